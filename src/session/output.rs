// A single ordered output item from the processor: either an outbound RTMP
// message to frame and send, or an event for the Application. Modeling both
// as variants of one type (rather than two parallel lists) is what keeps
// their relative order -- required by SPEC_FULL.md S4.5 -- representable
// without the caller having to interleave two Vecs back together.

use crate::message::Message;
use crate::session::event::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Response(Message),
    Event(Event),
}

impl Output {
    pub fn response(message: Message) -> Output {
        Output::Response(message)
    }

    pub fn event(event: Event) -> Output {
        Output::Event(event)
    }
}
