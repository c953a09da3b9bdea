/// Associates an I/O source registered with a [`Multiplexer`](crate::poll::Multiplexer)
/// with the event it reports.
///
/// Internally this is the value epoll (or the platform's selector) hands
/// back via `epoll_event.u64`; it is never interpreted, only round-tripped.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Token(pub usize);

impl From<Token> for usize {
    fn from(token: Token) -> usize {
        token.0
    }
}

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}
