use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::sync::OnceLock;

/// Source chains deeper than this are cut off when capturing.
const MAX_CAUSE_DEPTH: usize = 16;

/// One captured stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            function: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Frame for the source location that called the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }

    /// Parse a rendered frame such as `src/db.rs:42:in `connect``.
    ///
    /// Strings that do not look like `file:line`, or whose line number would
    /// not render back identically, are kept whole as the file.
    pub fn parse(raw: &str) -> Self {
        static FRAME_RE: OnceLock<Regex> = OnceLock::new();
        let re = FRAME_RE.get_or_init(|| {
            Regex::new(r"^(?P<file>.+?):(?P<line>\d+)(?::in `(?P<function>[^`]*)`)?$")
                .expect("frame pattern is valid")
        });

        let raw = raw.trim();
        let parsed = re.captures(raw).and_then(|caps| {
            let digits = &caps["line"];
            let line: u32 = digits.parse().ok()?;
            // Leading zeros would be lost on display
            if line.to_string() != digits {
                return None;
            }
            Some(Self {
                file: caps["file"].to_string(),
                line: Some(line),
                function: caps.name("function").map(|m| m.as_str().to_string()),
            })
        });

        parsed.unwrap_or_else(|| Self {
            file: raw.to_string(),
            line: None,
            function: None,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(function) = &self.function {
            write!(f, ":in `{}`", function)?;
        }
        Ok(())
    }
}

/// An error captured at the point it was caught.
///
/// Owns plain strings only, so no reference to the original error outlives
/// the capture.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionCapture {
    name: String,
    message: String,
    frames: Vec<Frame>,
    cause: Option<Box<ExceptionCapture>>,
}

impl ExceptionCapture {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Capture a concrete error value.
    ///
    /// The kind name is the error's type name without its module path, the
    /// first frame is the caller's location, and the `source()` chain becomes
    /// the nested cause.
    ///
    /// Only that one frame is recorded: Rust errors carry no stack of their
    /// own. Callers holding more frames (a parsed `std::backtrace::Backtrace`,
    /// frames from a foreign runtime) add them with `with_frames`.
    #[track_caller]
    pub fn from_error<E>(err: &E) -> Self
    where
        E: Error + 'static,
    {
        let mut capture =
            Self::new(short_type_name::<E>(), err.to_string()).with_frame(Frame::caller());
        capture.cause = err.source().map(|source| Box::new(Self::from_source(source, 1)));
        capture
    }

    fn from_source(err: &(dyn Error + 'static), depth: usize) -> Self {
        let mut capture = Self::new(debug_head(err), err.to_string());
        if depth < MAX_CAUSE_DEPTH {
            capture.cause = err
                .source()
                .map(|source| Box::new(Self::from_source(source, depth + 1)));
        }
        capture
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn with_cause(mut self, cause: ExceptionCapture) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&ExceptionCapture> {
        self.cause.as_deref()
    }
}

/// Transport-safe form of an exception, nested under `exception` in a document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedException {
    pub name: String,
    pub message: String,
    pub stack_trace: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<EncodedException>>,
}

/// Encode a captured exception. Frames keep their capture order; a capture
/// without frames encodes to an empty `stack_trace`.
pub fn encode_exception(capture: &ExceptionCapture) -> EncodedException {
    EncodedException {
        name: capture.name.clone(),
        message: capture.message.clone(),
        stack_trace: capture.frames.iter().map(Frame::to_string).collect(),
        cause: capture.cause().map(|cause| Box::new(encode_exception(cause))),
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

// The concrete type is erased behind `source()`; the head of its Debug output
// is the closest thing to a kind name that is left.
fn debug_head(err: &dyn Error) -> String {
    let debug = format!("{:?}", err);
    let head: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if head.is_empty() {
        "Error".to_string()
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum ReadError {
        #[error("could not read {path}")]
        Missing {
            path: String,
            #[source]
            source: std::io::Error,
        },
    }

    #[test]
    fn test_from_error_records_name_message_and_call_site() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let line = line!() + 1;
        let capture = ExceptionCapture::from_error(&err);

        assert_eq!(capture.name(), "Error");
        assert_eq!(capture.message(), "no such file");
        assert_eq!(capture.frames().len(), 1);
        assert_eq!(capture.frames()[0].file, file!());
        assert_eq!(capture.frames()[0].line, Some(line));
    }

    #[test]
    fn test_from_error_captures_source_chain() {
        let err = ReadError::Missing {
            path: "/tmp/x".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let capture = ExceptionCapture::from_error(&err);

        assert_eq!(capture.name(), "ReadError");
        assert_eq!(capture.message(), "could not read /tmp/x");
        let cause = capture.cause().expect("source should be captured");
        assert_eq!(cause.message(), "gone");
        assert!(cause.frames().is_empty());
    }

    #[test]
    fn test_encode_preserves_frame_order() {
        let capture = ExceptionCapture::new("NameError", "undefined local variable")
            .with_frame(Frame::new("app/model.rs", 10).in_function("load"))
            .with_frame(Frame::new("app/main.rs", 3));

        let encoded = encode_exception(&capture);

        assert_eq!(encoded.name, "NameError");
        assert_eq!(encoded.message, "undefined local variable");
        assert_eq!(
            encoded.stack_trace,
            vec!["app/model.rs:10:in `load`", "app/main.rs:3"]
        );
        assert!(encoded.cause.is_none());
    }

    #[test]
    fn test_encode_without_frames_yields_empty_stack_trace() {
        let encoded = encode_exception(&ExceptionCapture::new("Timeout", "took too long"));
        assert!(encoded.stack_trace.is_empty());

        let json = serde_json::to_value(&encoded).unwrap();
        assert_eq!(json["stack_trace"], serde_json::json!([]));
        assert!(json.get("cause").is_none());
    }

    #[test]
    fn test_encode_nests_cause() {
        let capture = ExceptionCapture::new("Outer", "outer failed")
            .with_cause(ExceptionCapture::new("Inner", "inner failed"));

        let encoded = encode_exception(&capture);
        let cause = encoded.cause.expect("cause encoded");
        assert_eq!(cause.name, "Inner");
        assert_eq!(cause.message, "inner failed");
    }

    #[test]
    fn test_frame_parse() {
        let frame = Frame::parse("src/db.rs:42:in `connect`");
        assert_eq!(frame, Frame::new("src/db.rs", 42).in_function("connect"));

        let frame = Frame::parse("lib/worker.rb:7");
        assert_eq!(frame, Frame::new("lib/worker.rb", 7));

        let frame = Frame::parse("<native code>");
        assert_eq!(frame.file, "<native code>");
        assert_eq!(frame.line, None);
        assert_eq!(frame.to_string(), "<native code>");
    }

    #[test]
    fn test_frame_parse_keeps_unrenderable_lines_raw() {
        let overflow = "src/gen.rs:99999999999";
        let frame = Frame::parse(overflow);
        assert_eq!(frame.line, None);
        assert_eq!(frame.to_string(), overflow);

        let padded = "src/gen.rs:007:in `main`";
        let frame = Frame::parse(padded);
        assert_eq!(frame.line, None);
        assert_eq!(frame.to_string(), padded);
    }

    #[test]
    fn test_short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<std::num::ParseIntError>(), "ParseIntError");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
