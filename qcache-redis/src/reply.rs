//! Typed view over replies from the store.
//!
//! A reply is received as a [`Frame`] tree. [`Reply`] wraps one node of that
//! tree and either owns it or borrows it from a parent array. Element access
//! on an array never copies: it hands out a reply borrowing the element, whose
//! lifetime is tied to the parent.
//!
//! ```
//! use qcache_redis::reply::{Frame, Reply, ReplyType};
//!
//! let reply = Reply::from(Frame::Array(vec![
//!     Frame::String(b"key".to_vec()),
//!     Frame::Integer(1),
//! ]));
//!
//! assert_eq!(reply.elements(), 2);
//! let first = reply.element(0);
//! assert_eq!(first.reply_type(), ReplyType::String);
//! assert_eq!(first.str(), b"key");
//! assert_eq!(reply.element(1).integer(), 1);
//! ```
//!
//! Calling an accessor on the wrong kind of reply is a programming error and
//! panics.

use std::fmt;

/// Owned storage of one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Nested replies, e.g. the result of `EXEC` or `HGETALL`.
    Array(Vec<Frame>),
    /// Error reply, e.g. `ERR wrong number of arguments`.
    Error(String),
    /// Integer reply.
    Integer(i64),
    /// Absent value.
    Nil,
    /// Status reply, e.g. `OK` or `QUEUED`.
    Status(String),
    /// Binary safe string.
    String(Vec<u8>),
}

impl Frame {
    /// Kind of this frame.
    pub fn reply_type(&self) -> ReplyType {
        match self {
            Frame::Array(_) => ReplyType::Array,
            Frame::Error(_) => ReplyType::Error,
            Frame::Integer(_) => ReplyType::Integer,
            Frame::Nil => ReplyType::Nil,
            Frame::Status(_) => ReplyType::Status,
            Frame::String(_) => ReplyType::String,
        }
    }
}

/// Kind of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyType {
    /// See [`Frame::Array`].
    Array,
    /// See [`Frame::Error`].
    Error,
    /// See [`Frame::Integer`].
    Integer,
    /// See [`Frame::Nil`].
    Nil,
    /// See [`Frame::Status`].
    Status,
    /// See [`Frame::String`].
    String,
}

impl fmt::Display for ReplyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplyType::Array => "ARRAY",
            ReplyType::Error => "ERROR",
            ReplyType::Integer => "INTEGER",
            ReplyType::Nil => "NIL",
            ReplyType::Status => "STATUS",
            ReplyType::String => "STRING",
        })
    }
}

#[derive(Debug)]
enum Content<'a> {
    Owned(Frame),
    Borrowed(&'a Frame),
}

/// One reply, owned or borrowed from a parent array.
///
/// A default-constructed reply is empty. Moving out with [`Reply::take`]
/// leaves the source empty. Owned storage is released when the reply drops;
/// borrowed storage belongs to the parent.
#[derive(Debug, Default)]
pub struct Reply<'a> {
    content: Option<Content<'a>>,
}

impl Reply<'static> {
    /// Wraps an owned frame.
    pub fn owned(frame: Frame) -> Self {
        Self {
            content: Some(Content::Owned(frame)),
        }
    }
}

impl<'a> Reply<'a> {
    /// Wraps a frame borrowed from elsewhere.
    pub fn borrowed(frame: &'a Frame) -> Self {
        Self {
            content: Some(Content::Borrowed(frame)),
        }
    }

    /// Returns `true` if the reply holds nothing.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
    }

    /// Returns `true` if the reply owns its storage.
    pub fn is_owned(&self) -> bool {
        matches!(self.content, Some(Content::Owned(_)))
    }

    /// Moves the content out, leaving this reply empty.
    pub fn take(&mut self) -> Reply<'a> {
        std::mem::take(self)
    }

    /// Releases the content, leaving this reply empty.
    pub fn reset(&mut self) {
        self.content = None;
    }

    fn frame(&self) -> &Frame {
        match &self.content {
            Some(Content::Owned(frame)) => frame,
            Some(Content::Borrowed(frame)) => *frame,
            None => panic!("access to an empty reply"),
        }
    }

    /// Kind of the reply.
    pub fn reply_type(&self) -> ReplyType {
        self.frame().reply_type()
    }

    /// Returns `true` for an array reply.
    pub fn is_array(&self) -> bool {
        self.reply_type() == ReplyType::Array
    }

    /// Returns `true` for an error reply.
    pub fn is_error(&self) -> bool {
        self.reply_type() == ReplyType::Error
    }

    /// Returns `true` for an integer reply.
    pub fn is_integer(&self) -> bool {
        self.reply_type() == ReplyType::Integer
    }

    /// Returns `true` for a nil reply.
    pub fn is_nil(&self) -> bool {
        self.reply_type() == ReplyType::Nil
    }

    /// Returns `true` for a status reply.
    pub fn is_status(&self) -> bool {
        self.reply_type() == ReplyType::Status
    }

    /// Returns `true` for a status reply whose text is `value`.
    pub fn is_status_value(&self, value: &str) -> bool {
        matches!(self.frame(), Frame::Status(status) if status == value)
    }

    /// Returns `true` for a string reply.
    pub fn is_string(&self) -> bool {
        self.reply_type() == ReplyType::String
    }

    /// Value of an integer reply.
    pub fn integer(&self) -> i64 {
        match self.frame() {
            Frame::Integer(value) => *value,
            other => panic!("integer() called on a {} reply", other.reply_type()),
        }
    }

    /// Bytes of an error, status or string reply.
    pub fn str(&self) -> &[u8] {
        match self.frame() {
            Frame::Error(text) | Frame::Status(text) => text.as_bytes(),
            Frame::String(bytes) => bytes.as_slice(),
            other => panic!("str() called on a {} reply", other.reply_type()),
        }
    }

    /// Length of [`Reply::str`].
    pub fn len(&self) -> usize {
        self.str().len()
    }

    /// Number of elements of an array reply.
    pub fn elements(&self) -> usize {
        match self.frame() {
            Frame::Array(items) => items.len(),
            other => panic!("elements() called on a {} reply", other.reply_type()),
        }
    }

    /// Element `i` of an array reply, borrowing this reply's storage.
    pub fn element(&self, i: usize) -> Reply<'_> {
        match self.frame() {
            Frame::Array(items) => {
                assert!(
                    i < items.len(),
                    "element {i} requested from an array of {}",
                    items.len()
                );
                Reply::borrowed(&items[i])
            }
            other => panic!("element() called on a {} reply", other.reply_type()),
        }
    }

    /// Converts the reply into an owned frame, copying if it is borrowed.
    pub fn into_frame(self) -> Option<Frame> {
        match self.content? {
            Content::Owned(frame) => Some(frame),
            Content::Borrowed(frame) => Some(frame.clone()),
        }
    }
}

impl From<Frame> for Reply<'static> {
    fn from(frame: Frame) -> Self {
        Reply::owned(frame)
    }
}

impl fmt::Display for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            None => f.write_str("<empty>"),
            Some(_) => match self.frame() {
                Frame::Array(items) => write!(f, "ARRAY[{}]", items.len()),
                Frame::Error(text) => write!(f, "ERROR '{text}'"),
                Frame::Integer(value) => write!(f, "INTEGER {value}"),
                Frame::Nil => f.write_str("NIL"),
                Frame::Status(text) => write!(f, "STATUS '{text}'"),
                Frame::String(bytes) => write!(f, "STRING({} bytes)", bytes.len()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reply_is_empty() {
        let reply = Reply::default();
        assert!(reply.is_empty());
        assert_eq!(reply.to_string(), "<empty>");
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut source = Reply::owned(Frame::Integer(7));
        let target = source.take();
        assert!(source.is_empty());
        assert!(target.is_owned());
        assert_eq!(target.integer(), 7);
    }

    #[test]
    fn elements_are_borrowed() {
        let reply = Reply::owned(Frame::Array(vec![
            Frame::Status("OK".into()),
            Frame::Nil,
        ]));
        let first = reply.element(0);
        assert!(!first.is_owned());
        assert!(first.is_status_value("OK"));
        assert!(!first.is_status_value("QUEUED"));
        assert!(reply.element(1).is_nil());
    }

    #[test]
    fn str_covers_textual_replies() {
        assert_eq!(Reply::owned(Frame::Error("ERR x".into())).str(), b"ERR x");
        assert_eq!(Reply::owned(Frame::Status("QUEUED".into())).len(), 6);
        assert_eq!(Reply::owned(Frame::String(vec![0, 1, 2])).str(), &[0, 1, 2]);
    }

    #[test]
    fn borrowed_reply_converts_into_owned_frame() {
        let reply = Reply::owned(Frame::Array(vec![Frame::Integer(3)]));
        let frame = reply.element(0).into_frame();
        assert_eq!(frame, Some(Frame::Integer(3)));
    }

    #[test]
    #[should_panic(expected = "integer() called on a STRING reply")]
    fn wrong_accessor_panics() {
        Reply::owned(Frame::String(b"1".to_vec())).integer();
    }

    #[test]
    #[should_panic(expected = "element 2 requested from an array of 1")]
    fn out_of_range_element_panics() {
        let reply = Reply::owned(Frame::Array(vec![Frame::Nil]));
        let _ = reply.element(2);
    }

    #[test]
    #[should_panic(expected = "access to an empty reply")]
    fn empty_reply_access_panics() {
        Reply::default().is_nil();
    }
}
