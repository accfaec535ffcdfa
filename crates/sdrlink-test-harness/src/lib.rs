//! sdrlink-test-harness: mock radio and packet builders for sdrlink tests.
//!
//! [`MockRadio`] is a scripted control-protocol server on a random local
//! port. The [`vita`] module builds VITA-49 datagrams byte-for-byte so the
//! demultiplexer and telemetry workers can be fed without hardware.

pub mod mock_radio;
pub mod vita;

pub use mock_radio::{MockRadio, MockRadioHandle};
