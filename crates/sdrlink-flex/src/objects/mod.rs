//! Remote objects kept in sync by status lines.
//!
//! Each object kind lives in its own [`ObjectRegistry`], keyed by a slice
//! index, a stream id or a meter id. A status line for an unknown key
//! creates the object unless the line is a removal, in which case it is
//! ignored. An object is *announced* only once it has received its full
//! status marker and whatever it depends on has been announced too; the
//! dispatcher re-evaluates that after every update so the marker and the
//! parent reference may arrive in either order.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::str::FromStr;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use sdrlink_core::ObjectRef;

pub mod info;
pub mod interlock;
pub mod meter;
pub mod panadapter;
pub mod radio;
pub mod slice;
pub mod streams;
pub mod waterfall;

pub use info::{ProfileKind, ProfileList, RadioInfo};
pub use interlock::{Interlock, InterlockState};
pub use meter::{Meter, MeterUnit};
pub use panadapter::Panadapter;
pub use radio::RadioSettings;
pub use slice::Slice;
pub use streams::{AudioStream, IqStream, OpusStream, StreamEndpoint};
pub use waterfall::Waterfall;

/// What a single `key=value` field did to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldResult {
    Applied,
    /// Key not recognised; ignored.
    Unknown,
    /// Key recognised but the value did not parse; field left unchanged.
    Invalid,
}

/// Parse a field value, logging and returning `None` when it is malformed.
pub(crate) fn parse_value<T: FromStr>(object: &str, key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(object = object, key = key, value = value, "Malformed status value");
            None
        }
    }
}

/// Store a parsed value into `slot`, reporting whether it parsed.
pub(crate) fn set_parsed<T: FromStr>(slot: &mut T, object: &str, key: &str, value: &str) -> FieldResult {
    match parse_value(object, key, value) {
        Some(v) => {
            *slot = v;
            FieldResult::Applied
        }
        None => FieldResult::Invalid,
    }
}

/// Store a `0`/`1` flag into `slot`.
pub(crate) fn set_flag(slot: &mut bool, object: &str, key: &str, value: &str) -> FieldResult {
    match crate::codec::parse_flag(value) {
        Some(v) => {
            *slot = v;
            FieldResult::Applied
        }
        None => {
            tracing::debug!(object = object, key = key, value = value, "Malformed status flag");
            FieldResult::Invalid
        }
    }
}

/// Store a hex stream id (`0x` prefix optional) into `slot`.
pub(crate) fn set_stream_id(slot: &mut u32, object: &str, key: &str, value: &str) -> FieldResult {
    match crate::codec::parse_hex_u32(value) {
        Some(v) => {
            *slot = v;
            FieldResult::Applied
        }
        None => {
            tracing::debug!(object = object, key = key, value = value, "Malformed stream id");
            FieldResult::Invalid
        }
    }
}

/// Apply every field to a flat object, logging unknown keys.
pub(crate) fn apply_fields<'a>(
    object: &str,
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    mut apply: impl FnMut(&str, &str) -> FieldResult,
) {
    for (key, value) in fields {
        if apply(key, value) == FieldResult::Unknown {
            tracing::trace!(object = object, key = key, "Unknown status key");
        }
    }
}

/// A precondition for announcing an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    None,
    /// The panadapter with this stream id has been announced.
    PanadapterAnnounced(u32),
    /// The waterfall with this stream id has been announced.
    WaterfallAnnounced(u32),
    /// A panadapter with this stream id exists, announced or not.
    PanadapterPresent(u32),
}

/// An object created and updated by status lines.
pub trait StatusObject: Clone + Send + 'static {
    type Key: Ord + Copy + Debug + Send + 'static;

    /// Name used in log fields.
    const KIND: &'static str;

    fn create(key: Self::Key) -> Self;

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult;

    /// Whether the full status marker has been received.
    fn full_status(&self) -> bool;

    /// Dependency that must hold before announcing.
    fn requirement(&self) -> Requirement {
        Requirement::None
    }

    fn object_ref(key: Self::Key) -> ObjectRef;
}

/// One status update for a keyed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<'a> {
    Fields(Vec<(&'a str, &'a str)>),
    Remove,
}

impl<'a> Update<'a> {
    /// Build an update from a whitespace-separated `key=value` remainder.
    ///
    /// A remainder starting with `removed`, or carrying `in_use=0`, is a removal.
    pub fn from_remainder(remainder: &'a str, context: &'static str) -> Self {
        if is_removal(remainder) {
            Update::Remove
        } else {
            Update::Fields(crate::codec::key_values(remainder, context).collect())
        }
    }
}

/// Whether a status remainder (the text after the object id) signals
/// removal of its object.
pub fn is_removal(remainder: &str) -> bool {
    remainder.split_whitespace().next() == Some("removed")
        || remainder.split_whitespace().any(|token| token == "in_use=0")
}

/// Result of applying an [`Update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Removal of an unknown key.
    Ignored,
    Created,
    Updated,
    /// The object was removed; `announced` tells whether it had been announced.
    Removed { announced: bool },
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    object: T,
    announced: bool,
}

/// Ordered collection of one object kind, under its own lock.
pub struct ObjectRegistry<T: StatusObject> {
    items: Mutex<BTreeMap<T::Key, Tracked<T>>>,
}

impl<T: StatusObject> Default for ObjectRegistry<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T: StatusObject> ObjectRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup-or-create, then apply.
    pub fn apply_status(&self, key: T::Key, update: Update<'_>) -> Applied {
        let mut items = self.items.lock();
        let fields = match update {
            Update::Remove => {
                return match items.remove(&key) {
                    Some(tracked) => {
                        tracing::debug!(kind = T::KIND, key = ?key, "Removed remote object");
                        Applied::Removed {
                            announced: tracked.announced,
                        }
                    }
                    None => Applied::Ignored,
                };
            }
            Update::Fields(fields) => fields,
        };

        if let Some(tracked) = items.get_mut(&key) {
            let object = &mut tracked.object;
            apply_fields(T::KIND, fields, |k, v| object.apply_field(k, v));
            return Applied::Updated;
        }

        let mut object = T::create(key);
        apply_fields(T::KIND, fields, |k, v| object.apply_field(k, v));
        tracing::debug!(kind = T::KIND, key = ?key, "Created remote object");
        items.insert(
            key,
            Tracked {
                object,
                announced: false,
            },
        );
        Applied::Created
    }

    pub fn get(&self, key: T::Key) -> Option<T> {
        self.items.lock().get(&key).map(|t| t.object.clone())
    }

    pub fn contains(&self, key: T::Key) -> bool {
        self.items.lock().contains_key(&key)
    }

    pub fn is_announced(&self, key: T::Key) -> bool {
        self.items.lock().get(&key).is_some_and(|t| t.announced)
    }

    /// Run `f` against the object under the registry lock.
    pub fn with_mut<R>(&self, key: T::Key, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.items.lock().get_mut(&key).map(|t| f(&mut t.object))
    }

    /// Fold over every object under the registry lock.
    pub fn fold<A>(&self, init: A, mut f: impl FnMut(A, &T) -> A) -> A {
        self.items
            .lock()
            .values()
            .fold(init, |acc, t| f(acc, &t.object))
    }

    /// Copies of the announced objects, in key order.
    pub fn announced(&self) -> Vec<T> {
        self.items
            .lock()
            .values()
            .filter(|t| t.announced)
            .map(|t| t.object.clone())
            .collect()
    }

    /// Copies of every object, announced or not, in key order.
    pub fn all(&self) -> Vec<T> {
        self.items.lock().values().map(|t| t.object.clone()).collect()
    }

    /// Unannounced objects whose full status has arrived, with their requirement.
    pub fn candidates(&self) -> Vec<(T::Key, Requirement)> {
        self.items
            .lock()
            .iter()
            .filter(|(_, t)| !t.announced && t.object.full_status())
            .map(|(k, t)| (*k, t.object.requirement()))
            .collect()
    }

    /// Mark an object announced. Returns `false` if absent or already announced.
    pub fn mark_announced(&self, key: T::Key) -> bool {
        match self.items.lock().get_mut(&key) {
            Some(t) if !t.announced => {
                t.announced = true;
                true
            }
            _ => false,
        }
    }

    /// Remove every object, returning the keys that had been announced.
    pub fn clear(&self) -> Vec<T::Key> {
        let drained = std::mem::take(&mut *self.items.lock());
        drained
            .into_iter()
            .filter(|(_, t)| t.announced)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every remote-object registry and flat object of one connection.
#[derive(Default)]
pub struct ObjectStore {
    pub slices: ObjectRegistry<Slice>,
    pub panadapters: ObjectRegistry<Panadapter>,
    pub waterfalls: ObjectRegistry<Waterfall>,
    pub audio_streams: ObjectRegistry<AudioStream>,
    pub iq_streams: ObjectRegistry<IqStream>,
    pub opus_streams: ObjectRegistry<OpusStream>,
    pub meters: ObjectRegistry<Meter>,
    pub radio: Mutex<RadioSettings>,
    pub interlock: Mutex<Interlock>,
    pub info: Mutex<RadioInfo>,
    closed: RwLock<bool>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one status update. `None` once the store is closed.
    ///
    /// [`close`](Self::close) waits for every admitted update to finish.
    pub fn admit(&self) -> Option<RwLockReadGuard<'_, bool>> {
        let closed = self.closed.read();
        if *closed { None } else { Some(closed) }
    }

    /// Refuse further updates and empty every keyed registry, returning the
    /// announced objects removed.
    pub fn close(&self) -> Vec<ObjectRef> {
        let mut closed = self.closed.write();
        *closed = true;
        self.clear()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Empty every keyed registry, returning the announced objects removed.
    ///
    /// Flat objects and radio info are left as they are.
    pub fn clear(&self) -> Vec<ObjectRef> {
        let mut removed = Vec::new();
        removed.extend(self.slices.clear().into_iter().map(ObjectRef::Slice));
        removed.extend(self.panadapters.clear().into_iter().map(ObjectRef::Panadapter));
        removed.extend(self.waterfalls.clear().into_iter().map(ObjectRef::Waterfall));
        removed.extend(self.audio_streams.clear().into_iter().map(ObjectRef::AudioStream));
        removed.extend(self.iq_streams.clear().into_iter().map(ObjectRef::IqStream));
        removed.extend(self.opus_streams.clear().into_iter().map(ObjectRef::OpusStream));
        removed.extend(self.meters.clear().into_iter().map(ObjectRef::Meter));
        removed
    }

    /// Out-of-sequence packet total across every tracked stream.
    ///
    /// Meter errors are counted by the meter worker and not included.
    pub fn stream_errors(&self) -> u64 {
        let pans = self.panadapters.fold(0, |acc, p| acc + p.fft_errors());
        let falls = self.waterfalls.fold(0, |acc, w| acc + w.errors());
        let opus = self.opus_streams.fold(0, |acc, o| acc + o.errors());
        pans + falls + opus
    }
}
