//! Status line dispatch.
//!
//! A status payload starts with a category word (`slice`, `display`,
//! `meter`...). [`StatusDispatcher`] looks the category up in a table of
//! parsers; each parser turns the rest of the line into an [`Update`] for
//! one registry. After every line the dispatcher announces whatever became
//! ready, repeating until nothing changes, so a parent arriving after its
//! child releases both in one pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use sdrlink_core::{ObjectRef, RadioEvent};
use tokio::sync::broadcast;

use crate::codec::{self, split_token};
use crate::objects::{
    Applied, ObjectRegistry, ObjectStore, ProfileKind, Requirement, StatusObject, Update,
    is_removal,
};

type StatusParser = fn(&StatusDispatcher, &str);

/// Category word to parser.
const STATUS_PARSERS: &[(&str, StatusParser)] = &[
    ("slice", StatusDispatcher::on_slice),
    ("display", StatusDispatcher::on_display),
    ("audio_stream", StatusDispatcher::on_audio_stream),
    ("daxiq", StatusDispatcher::on_iq_stream),
    ("opus_stream", StatusDispatcher::on_opus_stream),
    ("meter", StatusDispatcher::on_meter),
    ("radio", StatusDispatcher::on_radio),
    ("interlock", StatusDispatcher::on_interlock),
    ("profile", StatusDispatcher::on_profile),
];

/// Applies status payloads to an [`ObjectStore`] and publishes readiness.
pub struct StatusDispatcher {
    objects: Arc<ObjectStore>,
    events: broadcast::Sender<RadioEvent>,
}

impl StatusDispatcher {
    pub fn new(objects: Arc<ObjectStore>, events: broadcast::Sender<RadioEvent>) -> Self {
        Self { objects, events }
    }

    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.objects
    }

    /// Apply one status payload (everything after `S<handle>|`).
    ///
    /// Ignored once the store has been closed.
    pub fn dispatch(&self, payload: &str) {
        let Some(_admitted) = self.objects.admit() else {
            tracing::trace!("Status after close, ignored");
            return;
        };
        let (category, remainder) = split_token(payload);
        match STATUS_PARSERS.iter().find(|(name, _)| *name == category) {
            Some((_, parser)) => {
                parser(self, remainder);
                self.settle();
            }
            None => {
                tracing::trace!(category = %category, "Ignoring status category");
            }
        }
    }

    /// Announce every object whose readiness now holds, until a fixpoint.
    fn settle(&self) {
        loop {
            let mut progressed = false;
            progressed |= self.announce_ready(&self.objects.waterfalls);
            progressed |= self.announce_ready(&self.objects.panadapters);
            progressed |= self.announce_ready(&self.objects.slices);
            progressed |= self.announce_ready(&self.objects.audio_streams);
            progressed |= self.announce_ready(&self.objects.iq_streams);
            progressed |= self.announce_ready(&self.objects.opus_streams);
            progressed |= self.announce_ready(&self.objects.meters);
            if !progressed {
                break;
            }
        }
    }

    fn requirement_met(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::None => true,
            Requirement::PanadapterAnnounced(id) => self.objects.panadapters.is_announced(id),
            Requirement::WaterfallAnnounced(id) => self.objects.waterfalls.is_announced(id),
            Requirement::PanadapterPresent(id) => self.objects.panadapters.contains(id),
        }
    }

    fn announce_ready<T: StatusObject>(&self, registry: &ObjectRegistry<T>) -> bool {
        let mut progressed = false;
        for (key, requirement) in registry.candidates() {
            if self.requirement_met(requirement) && registry.mark_announced(key) {
                let object = T::object_ref(key);
                tracing::debug!(object = %object, "Remote object ready");
                self.emit(RadioEvent::ObjectAdded { object });
                progressed = true;
            }
        }
        progressed
    }

    fn apply<T: StatusObject>(&self, registry: &ObjectRegistry<T>, key: T::Key, update: Update<'_>) {
        if let Applied::Removed { announced: true } = registry.apply_status(key, update) {
            self.emit(RadioEvent::ObjectRemoved {
                object: T::object_ref(key),
            });
        }
    }

    fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }

    // -- Category parsers --

    fn on_slice(&self, remainder: &str) {
        let (index, rest) = split_token(remainder);
        match index.parse::<u8>() {
            Ok(index) => self.apply(
                &self.objects.slices,
                index,
                Update::from_remainder(rest, "slice"),
            ),
            Err(_) => tracing::debug!(index = %index, "Malformed slice index"),
        }
    }

    fn on_display(&self, remainder: &str) {
        let (kind, rest) = split_token(remainder);
        let (id, rest) = split_token(rest);
        let Some(stream_id) = codec::parse_hex_u32(id) else {
            tracing::debug!(kind = %kind, id = %id, "Malformed display stream id");
            return;
        };
        match kind {
            "pan" => self.apply(
                &self.objects.panadapters,
                stream_id,
                Update::from_remainder(rest, "panadapter"),
            ),
            "waterfall" => self.apply(
                &self.objects.waterfalls,
                stream_id,
                Update::from_remainder(rest, "waterfall"),
            ),
            _ => tracing::trace!(kind = %kind, "Ignoring display kind"),
        }
    }

    fn on_audio_stream(&self, remainder: &str) {
        self.on_stream(&self.objects.audio_streams, remainder);
    }

    fn on_iq_stream(&self, remainder: &str) {
        self.on_stream(&self.objects.iq_streams, remainder);
    }

    fn on_opus_stream(&self, remainder: &str) {
        self.on_stream(&self.objects.opus_streams, remainder);
    }

    fn on_stream<T: StatusObject<Key = u32>>(&self, registry: &ObjectRegistry<T>, remainder: &str) {
        let (id, rest) = split_token(remainder);
        match codec::parse_hex_u32(id) {
            Some(stream_id) => self.apply(registry, stream_id, Update::from_remainder(rest, T::KIND)),
            None => tracing::debug!(kind = T::KIND, id = %id, "Malformed stream id"),
        }
    }

    /// `meter 1.src=SLC#1.num=0#1.nam=LEVEL#...` or `meter 5 removed`.
    fn on_meter(&self, remainder: &str) {
        let (id, rest) = split_token(remainder);
        if let (Ok(id), true) = (id.parse::<u16>(), is_removal(rest)) {
            self.apply(&self.objects.meters, id, Update::Remove);
            return;
        }

        for (id, fields) in group_meter_fields(remainder) {
            self.apply(&self.objects.meters, id, Update::Fields(fields));
        }
    }

    fn on_radio(&self, remainder: &str) {
        self.objects.radio.lock().apply_status(remainder);
    }

    fn on_interlock(&self, remainder: &str) {
        self.objects.interlock.lock().apply_status(remainder);
    }

    /// `profile tx list=A^B^` or `profile tx current=A`.
    fn on_profile(&self, remainder: &str) {
        let (word, rest) = split_token(remainder);
        let Some(kind) = ProfileKind::from_status(word) else {
            tracing::trace!(kind = %word, "Ignoring profile kind");
            return;
        };
        let mut info = self.objects.info.lock();
        if rest.starts_with("list=") {
            info.set_profiles(kind, rest);
        } else if let Some(current) = rest.strip_prefix("current=") {
            info.set_current_profile(kind, current.trim());
        }
    }
}

/// Split a `#`-separated meter status into per-meter field lists.
///
/// Values may contain spaces, so fields are never split on whitespace.
fn group_meter_fields(remainder: &str) -> BTreeMap<u16, Vec<(&str, &str)>> {
    let mut grouped: BTreeMap<u16, Vec<(&str, &str)>> = BTreeMap::new();
    for item in remainder.split('#').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = item.split_once('.').and_then(|(id, field)| {
            let id = id.parse::<u16>().ok()?;
            let (key, value) = field.split_once('=')?;
            Some((id, key, value))
        });
        match parsed {
            Some((id, key, value)) => grouped.entry(id).or_default().push((key, value)),
            None => tracing::debug!(item = %item, "Malformed meter field"),
        }
    }
    grouped
}

/// Emit a removal event for each object in `removed`.
pub(crate) fn publish_removed(events: &broadcast::Sender<RadioEvent>, removed: Vec<ObjectRef>) {
    for object in removed {
        tracing::debug!(object = %object, "Remote object removed");
        let _ = events.send(RadioEvent::ObjectRemoved { object });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::MeterUnit;

    fn dispatcher() -> (StatusDispatcher, broadcast::Receiver<RadioEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (StatusDispatcher::new(Arc::new(ObjectStore::new()), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<RadioEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                RadioEvent::ObjectAdded { object } => out.push(format!("+{object}")),
                RadioEvent::ObjectRemoved { object } => out.push(format!("-{object}")),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn slice_without_pan_is_announced_on_in_use() {
        let (d, mut rx) = dispatcher();
        d.dispatch("slice 0 mode=USB RF_frequency=14.200000");
        assert!(drain(&mut rx).is_empty());
        d.dispatch("slice 0 in_use=1 pan=0x0");
        assert_eq!(drain(&mut rx), vec!["+slice 0"]);
        assert_eq!(d.objects().slices.get(0).unwrap().mode, "USB");
    }

    #[test]
    fn slice_waits_for_its_panadapter() {
        let (d, mut rx) = dispatcher();
        d.dispatch("slice 1 in_use=1 pan=0x40000000");
        assert!(drain(&mut rx).is_empty());

        d.dispatch("display pan 0x40000000 x_pixels=1024 waterfall=0x42000000");
        assert!(drain(&mut rx).is_empty());

        d.dispatch("display waterfall 0x42000000 panadapter=40000000 line_duration=100");
        assert_eq!(
            drain(&mut rx),
            vec!["+waterfall 0x42000000", "+panadapter 0x40000000", "+slice 1"]
        );
    }

    #[test]
    fn waterfall_before_panadapter() {
        let (d, mut rx) = dispatcher();
        d.dispatch("display waterfall 0x42000000 panadapter=0x40000000");
        assert!(drain(&mut rx).is_empty());
        d.dispatch("display pan 0x40000000 waterfall=0x42000000");
        assert_eq!(
            drain(&mut rx),
            vec!["+waterfall 0x42000000", "+panadapter 0x40000000"]
        );
    }

    #[test]
    fn removal_emits_only_for_announced() {
        let (d, mut rx) = dispatcher();
        d.dispatch("slice 2 mode=CW");
        d.dispatch("slice 2 in_use=0");
        assert!(drain(&mut rx).is_empty());
        assert!(d.objects().slices.is_empty());

        d.dispatch("slice 3 in_use=1");
        d.dispatch("slice 3 in_use=0");
        assert_eq!(drain(&mut rx), vec!["+slice 3", "-slice 3"]);

        d.dispatch("slice 3 in_use=0");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn meter_status_groups_by_id() {
        let (d, mut rx) = dispatcher();
        d.dispatch(
            "meter 1.src=SLC#1.num=0#1.nam=LEVEL#1.unit=dBm#1.low=-150.0#1.hi=20.0#\
             2.src=RAD#2.nam=PATEMP#2.unit=degC#2.desc=PA temperature#",
        );
        assert_eq!(drain(&mut rx), vec!["+meter 1", "+meter 2"]);

        let m1 = d.objects().meters.get(1).unwrap();
        assert_eq!(m1.source.as_deref(), Some("SLC"));
        assert_eq!(m1.unit, Some(MeterUnit::Dbm));
        assert_eq!(m1.high, Some(20.0));
        let m2 = d.objects().meters.get(2).unwrap();
        assert_eq!(m2.description.as_deref(), Some("PA temperature"));

        d.dispatch("meter 2 removed");
        assert_eq!(drain(&mut rx), vec!["-meter 2"]);
        assert!(!d.objects().meters.contains(2));
    }

    #[test]
    fn removed_inside_meter_description_is_not_a_removal() {
        let (d, mut rx) = dispatcher();
        d.dispatch("meter 5.nam=FWD#5.unit=dBm#5.desc=Shown until removed");
        assert_eq!(drain(&mut rx), vec!["+meter 5"]);
        d.dispatch("meter 5.desc=Probe removed");
        assert!(drain(&mut rx).is_empty());
        assert!(d.objects().meters.contains(5));
        assert_eq!(
            d.objects().meters.get(5).unwrap().description.as_deref(),
            Some("Probe removed")
        );
    }

    #[test]
    fn closed_store_ignores_status() {
        let (d, mut rx) = dispatcher();
        d.dispatch("slice 0 in_use=1");
        assert_eq!(drain(&mut rx), vec!["+slice 0"]);

        d.objects().close();
        d.dispatch("slice 1 in_use=1");
        d.dispatch("meter 3.nam=SWR#3.unit=SWR");
        assert!(drain(&mut rx).is_empty());
        assert!(d.objects().slices.is_empty());
        assert!(d.objects().meters.is_empty());
    }

    #[test]
    fn malformed_meter_items_are_skipped() {
        let (d, mut rx) = dispatcher();
        d.dispatch("meter x.nam=A#3.unit#3.nam=SWR#3.unit=SWR");
        assert_eq!(drain(&mut rx), vec!["+meter 3"]);
        assert_eq!(d.objects().meters.len(), 1);
    }

    #[test]
    fn streams_announce_on_ip() {
        let (d, mut rx) = dispatcher();
        d.dispatch("audio_stream 0x04000008 dax=1 slice=0 port=4991");
        d.dispatch("audio_stream 0x04000008 ip=10.0.0.2");
        d.dispatch("daxiq 0x20000000 pan=0x40000000 rate=48000 ip=10.0.0.2");
        d.dispatch("opus_stream 0x0A000000 rx_on=1 ip=10.0.0.2");
        assert_eq!(
            drain(&mut rx),
            vec![
                "+audio stream 0x04000008",
                "+iq stream 0x20000000",
                "+opus stream 0x0A000000"
            ]
        );
        d.dispatch("opus_stream 0x0A000000 removed");
        assert_eq!(drain(&mut rx), vec!["-opus stream 0x0A000000"]);
    }

    #[test]
    fn flat_objects_and_profiles() {
        let (d, _rx) = dispatcher();
        d.dispatch("radio slices=4 nickname=Shack");
        d.dispatch("interlock state=READY tx_allowed=1");
        d.dispatch("profile global list=Default^Contest^");
        d.dispatch("profile global current=Contest");
        assert_eq!(d.objects().radio.lock().nickname, "Shack");
        assert!(d.objects().interlock.lock().tx_allowed);
        let info = d.objects().info.lock();
        assert_eq!(info.profile_names(ProfileKind::Global), ["Default", "Contest"]);
        assert_eq!(
            info.profiles[&ProfileKind::Global].current.as_deref(),
            Some("Contest")
        );
    }

    #[test]
    fn unknown_category_and_bad_keys_are_ignored() {
        let (d, mut rx) = dispatcher();
        d.dispatch("gps lat=1 lon=2");
        d.dispatch("slice abc in_use=1");
        d.dispatch("display pan zz waterfall=0");
        d.dispatch("display panafall 0x40000000 x=1");
        assert!(drain(&mut rx).is_empty());
        assert!(d.objects().slices.is_empty());
        assert!(d.objects().panadapters.is_empty());
    }

    #[test]
    fn publish_removed_sends_one_event_each() {
        let (tx, mut rx) = broadcast::channel(8);
        publish_removed(&tx, vec![ObjectRef::Slice(0), ObjectRef::Meter(1)]);
        assert_eq!(drain(&mut rx), vec!["-slice 0", "-meter 1"]);
    }
}
