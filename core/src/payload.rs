//! Runtime type tags, payloads and the request event.
//!
//! The network-facing collaborator wraps each inbound message into a
//! [`RequestEvent`]: a request payload, a response payload, an optional target
//! handler name and a `handled` flag. Contexts decide whether they accept an
//! event by comparing the payloads' [`TypeTag`]s with the tags they declare.
//!
//! Rust has no subtyping, so the "is-a" relation between payload types is
//! modelled explicitly: a tag may extend a parent tag, and a declared tag is
//! assignable from any tag whose ancestry contains it.
//!
//! ```
//! use bindlet_core::payload::TypeTag;
//!
//! static REQUEST: TypeTag = TypeTag::new("request");
//! static HTTP_REQUEST: TypeTag = TypeTag::extending("http.request", &REQUEST);
//!
//! assert!(REQUEST.is_assignable_from(&HTTP_REQUEST));
//! assert!(!HTTP_REQUEST.is_assignable_from(&REQUEST));
//! ```

use std::any::Any;
use std::fmt;

/// Runtime type of a payload
#[derive(Debug)]
pub struct TypeTag {
    name: &'static str,
    parent: Option<&'static TypeTag>,
}

impl TypeTag {
    /// Tag every other tag is assignable to
    pub const ANY: TypeTag = TypeTag::new("*");

    /// A root tag
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// A tag extending `parent`
    #[must_use]
    pub const fn extending(name: &'static str, parent: &'static TypeTag) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// Tag name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Direct parent, if any
    #[must_use]
    pub const fn parent(&self) -> Option<&'static TypeTag> {
        self.parent
    }

    /// This tag followed by all of its ancestors
    pub fn ancestry(&self) -> impl Iterator<Item = &TypeTag> {
        std::iter::successors(Some(self), |tag| tag.parent.map(|parent| parent as &TypeTag))
    }

    /// Whether a value tagged `other` may be used where `self` is declared
    #[must_use]
    pub fn is_assignable_from(&self, other: &TypeTag) -> bool {
        self.name == Self::ANY.name || other.ancestry().any(|tag| tag.name == self.name)
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeTag {}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A request or response body carried by a [`RequestEvent`]
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Runtime type of this payload
    fn type_tag(&self) -> &'static TypeTag;

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Statically tagged payload types
///
/// Implementing this is all that is needed to become a [`Payload`].
pub trait Typed: Any + Send + Sync + fmt::Debug {
    /// The type tag shared by all values of this type
    const TYPE: &'static TypeTag;
}

impl<T: Typed> Payload for T {
    fn type_tag(&self) -> &'static TypeTag {
        T::TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn Payload {
    /// Borrow as the concrete type
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Mutably borrow as the concrete type
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

/// A request/response pair travelling down the dispatch tree
///
/// Exactly one context/handler pair consumes an event; whichever component
/// accepted it sets the `handled` flag.
#[derive(Debug)]
pub struct RequestEvent {
    request: Box<dyn Payload>,
    response: Box<dyn Payload>,
    handler: Option<String>,
    handled: bool,
}

impl RequestEvent {
    /// Wrap a request and the response to fill in
    #[must_use]
    pub fn new(request: impl Payload, response: impl Payload) -> Self {
        Self::from_boxed(Box::new(request), Box::new(response))
    }

    /// Wrap already boxed payloads
    #[must_use]
    pub fn from_boxed(request: Box<dyn Payload>, response: Box<dyn Payload>) -> Self {
        Self {
            request,
            response,
            handler: None,
            handled: false,
        }
    }

    /// Name the handler this event targets
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>) -> Self {
        self.handler = Some(name.into());
        self
    }

    /// Target handler name, if the caller supplied one
    #[must_use]
    pub fn handler_name(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Runtime type of the request
    #[must_use]
    pub fn request_type(&self) -> &'static TypeTag {
        self.request.type_tag()
    }

    /// Runtime type of the response
    #[must_use]
    pub fn response_type(&self) -> &'static TypeTag {
        self.response.type_tag()
    }

    /// The request payload
    #[must_use]
    pub fn request(&self) -> &dyn Payload {
        self.request.as_ref()
    }

    /// The response payload
    #[must_use]
    pub fn response(&self) -> &dyn Payload {
        self.response.as_ref()
    }

    /// Mutable access to the response payload
    pub fn response_mut(&mut self) -> &mut dyn Payload {
        self.response.as_mut()
    }

    /// Borrow both payloads at once, request first
    pub fn payloads_mut(&mut self) -> (&mut dyn Payload, &mut dyn Payload) {
        (self.request.as_mut(), self.response.as_mut())
    }

    /// Whether some component accepted this event
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        self.handled
    }

    /// Record that this event was accepted
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Take the payloads back out
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn Payload>, Box<dyn Payload>) {
        (self.request, self.response)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    static MESSAGE: TypeTag = TypeTag::new("message");
    static PING: TypeTag = TypeTag::extending("ping", &MESSAGE);
    static OTHER: TypeTag = TypeTag::new("other");

    #[derive(Debug)]
    struct Ping(u32);

    impl Typed for Ping {
        const TYPE: &'static TypeTag = &PING;
    }

    #[derive(Debug, Default)]
    struct Pong(Option<u32>);

    impl Typed for Pong {
        const TYPE: &'static TypeTag = &MESSAGE;
    }

    #[test]
    fn test_assignability_walks_ancestry() {
        assert!(MESSAGE.is_assignable_from(&PING));
        assert!(PING.is_assignable_from(&PING));
        assert!(!PING.is_assignable_from(&MESSAGE));
        assert!(!OTHER.is_assignable_from(&PING));
        assert!(TypeTag::ANY.is_assignable_from(&OTHER));
    }

    #[test]
    fn test_ancestry_order() {
        let names: Vec<_> = PING.ancestry().map(TypeTag::name).collect();
        assert_eq!(names, vec!["ping", "message"]);
    }

    #[test]
    fn test_event_exposes_runtime_types_and_payloads() {
        let mut event = RequestEvent::new(Ping(7), Pong::default()).with_handler("echo");

        assert_eq!(event.request_type(), &PING);
        assert_eq!(event.response_type(), &MESSAGE);
        assert_eq!(event.handler_name(), Some("echo"));
        assert!(!event.is_handled());

        let (request, response) = event.payloads_mut();
        let value = request.downcast_ref::<Ping>().unwrap().0;
        response.downcast_mut::<Pong>().unwrap().0 = Some(value);
        event.mark_handled();

        assert!(event.is_handled());
        assert_eq!(event.response().downcast_ref::<Pong>().unwrap().0, Some(7));
        assert!(event.request().downcast_ref::<Pong>().is_none());
    }
}
