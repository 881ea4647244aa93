/// Receives the events of one streaming call.
///
/// `on_delta` fires zero or more times in wire order. At most one of `on_done`
/// and `on_error` follows; a cancelled call fires neither.
pub trait StreamHandler {
    fn on_delta(&mut self, text: &str);
    fn on_done(&mut self);
    fn on_error(&mut self, message: &str);
}

/// Adapts three closures to [`StreamHandler`].
pub struct Callbacks<D, F, E> {
    on_delta: D,
    on_done: F,
    on_error: E,
}

impl<D, F, E> Callbacks<D, F, E>
where
    D: FnMut(&str),
    F: FnMut(),
    E: FnMut(&str),
{
    pub fn new(on_delta: D, on_done: F, on_error: E) -> Self {
        Self {
            on_delta,
            on_done,
            on_error,
        }
    }
}

impl<D, F, E> StreamHandler for Callbacks<D, F, E>
where
    D: FnMut(&str),
    F: FnMut(),
    E: FnMut(&str),
{
    fn on_delta(&mut self, text: &str) {
        (self.on_delta)(text)
    }

    fn on_done(&mut self) {
        (self.on_done)()
    }

    fn on_error(&mut self, message: &str) {
        (self.on_error)(message)
    }
}
