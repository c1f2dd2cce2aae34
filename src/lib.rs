pub mod appender;
pub mod buffer;
pub mod cli;
pub mod client;
pub mod config;
pub mod document;
pub mod event;
pub mod exception;
pub mod fallback;
pub mod index;
pub mod shipper;

pub use appender::{Appender, AppenderError, ValidationError};
pub use config::AppenderConfig;
pub use event::{Event, Payload, PayloadValue};
pub use exception::{encode_exception, ExceptionCapture, Frame};
pub use index::{daily_index_name, IndexNamer};
