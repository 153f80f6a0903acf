//! Per-request state machine (§4.3).
//!
//! `RequestState` drives what inbound frames are legal and what the dispatcher is allowed to emit
//! for a single sequence. It knows nothing about transport or payloads — it is pure bookkeeping the
//! dispatcher consults before acting on a frame.

use crate::envelope::{ErrorCode, RequestFrameType};
use crate::handler::CallShape;

/// States a request moves through over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Created on the first frame for a sequence; not yet classified/dispatched.
    New,
    /// The handler is running; both directions may still produce data.
    Open,
    /// The client sent END_OF_STREAM; only the server may still produce data.
    HalfClosedRemote,
    /// The request finished normally (a terminal outbound frame was enqueued).
    Closed,
    /// The request was cancelled by an inbound CANCEL frame.
    Cancelled,
    /// The request was terminated by a protocol violation.
    Errored,
}

impl RequestState {
    /// Whether the request has left `New`/`Open`/`HalfClosedRemote` for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled | Self::Errored)
    }
}

/// The outcome of feeding one inbound frame through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The frame is legal; route it to the request's inbound queue / handler launch.
    Accept(RequestState),
    /// The frame is illegal; the dispatcher must emit the given error and transition as shown.
    Reject(RequestState, ErrorCode),
}

/// Validate an inbound request frame against the current state and call shape, returning the next
/// state (or the error to emit) without mutating anything — callers apply the transition themselves.
pub fn advance(
    state: RequestState,
    shape: CallShape,
    frame_type: RequestFrameType,
) -> Transition {
    use RequestFrameType as F;
    use RequestState as S;

    if state.is_terminal() {
        // After CANCEL/CLOSED/ERRORED, no further inbound frames are accepted (invariant 5).
        return Transition::Reject(state, ErrorCode::InvalidArgument);
    }

    match frame_type {
        F::Cancel => Transition::Accept(S::Cancelled),
        F::EndOfStream => match state {
            S::New | S::Open => Transition::Accept(S::HalfClosedRemote),
            S::HalfClosedRemote => Transition::Reject(S::Errored, ErrorCode::InvalidArgument),
            S::Closed | S::Cancelled | S::Errored => unreachable!("terminal states handled above"),
        },
        F::Message | F::Metadata => match state {
            S::New => Transition::Accept(S::Open),
            S::Open => {
                if matches!(shape, CallShape::ClientStreamUnary | CallShape::Bidi) {
                    Transition::Accept(S::Open)
                } else {
                    // Unary/server-stream input shapes accept exactly one MESSAGE before the
                    // client must send END_OF_STREAM; a second one is a protocol error.
                    Transition::Reject(S::Errored, ErrorCode::InvalidArgument)
                }
            }
            S::HalfClosedRemote => Transition::Reject(S::Errored, ErrorCode::InvalidArgument),
            S::Closed | S::Cancelled | S::Errored => unreachable!("terminal states handled above"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_second_message_is_a_protocol_error() {
        let after_first = advance(RequestState::New, CallShape::UnaryUnary, RequestFrameType::Message);
        assert_eq!(after_first, Transition::Accept(RequestState::Open));

        let after_second =
            advance(RequestState::Open, CallShape::UnaryUnary, RequestFrameType::Message);
        assert_eq!(
            after_second,
            Transition::Reject(RequestState::Errored, ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn client_stream_buffers_many_messages() {
        let mut state = RequestState::New;
        for _ in 0..3 {
            match advance(state, CallShape::ClientStreamUnary, RequestFrameType::Message) {
                Transition::Accept(next) => state = next,
                Transition::Reject(..) => panic!("client-stream message should be accepted"),
            }
        }
        assert_eq!(state, RequestState::Open);
    }

    #[test]
    fn end_of_stream_then_message_errors() {
        let half_closed =
            advance(RequestState::Open, CallShape::ClientStreamUnary, RequestFrameType::EndOfStream);
        assert_eq!(half_closed, Transition::Accept(RequestState::HalfClosedRemote));

        let illegal = advance(
            RequestState::HalfClosedRemote,
            CallShape::ClientStreamUnary,
            RequestFrameType::Message,
        );
        assert_eq!(illegal, Transition::Reject(RequestState::Errored, ErrorCode::InvalidArgument));
    }

    #[test]
    fn cancel_is_accepted_from_any_non_terminal_state() {
        for state in [RequestState::New, RequestState::Open, RequestState::HalfClosedRemote] {
            assert_eq!(
                advance(state, CallShape::Bidi, RequestFrameType::Cancel),
                Transition::Accept(RequestState::Cancelled)
            );
        }
    }

    #[test]
    fn frames_after_cancel_are_rejected() {
        assert_eq!(
            advance(RequestState::Cancelled, CallShape::Bidi, RequestFrameType::Message),
            Transition::Reject(RequestState::Cancelled, ErrorCode::InvalidArgument)
        );
    }
}
