use super::RequestError;
use parking_lot::Mutex;
use std::{
    fmt::{Debug, Error as FmtError, Formatter},
    sync::Arc,
};

type Callback<T> = Box<dyn FnOnce(Result<T, RequestError>) + Send>;

/// The receiving end of a request: a callback that is invoked exactly once, either with the
/// requested data or with an error.
///
/// A promise can be cloned, so that several stages of a transform can hold on to it. The first
/// call to [`fulfill`] on any of the clones invokes the callback; later calls do nothing. If
/// every clone is dropped without the promise being fulfilled, the callback is invoked with
/// [`RequestError::Abandoned`], so that a requester never waits forever.
///
/// [`fulfill`]: Self::fulfill
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    callback: Mutex<Option<Callback<T>>>,
}

impl<T> Promise<T> {
    /// Creates a new `Promise` that invokes `callback` with the result.
    pub fn new(callback: impl FnOnce(Result<T, RequestError>) + Send + 'static) -> Self {
        Promise {
            shared: Arc::new(Shared {
                callback: Mutex::new(Some(Box::new(callback))),
            }),
        }
    }

    /// Delivers `result` to the callback, if no result was delivered before. Returns whether
    /// this call delivered it.
    pub fn fulfill(&self, result: Result<T, RequestError>) -> bool {
        // The lock must not be held while the callback runs, as it may drop other clones.
        let callback = self.shared.callback.lock().take();

        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Returns whether a result was delivered already.
    #[inline]
    pub fn is_fulfilled(&self) -> bool {
        self.shared.callback.lock().is_none()
    }
}

impl<T> Clone for Promise<T> {
    #[inline]
    fn clone(&self) -> Self {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_struct("Promise")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.get_mut().take() {
            callback(Err(RequestError::Abandoned));
        }
    }
}

/// Returns a promise together with a receiver that the result can be polled from.
pub fn channel<T: Send + 'static>() -> (Promise<T>, Receiver<T>) {
    let slot = Arc::new(Mutex::new(None));
    let promise = Promise::new({
        let slot = slot.clone();
        move |result| *slot.lock() = Some(result)
    });

    (promise, Receiver { slot })
}

/// The polling end of a [`channel`].
#[derive(Debug)]
pub struct Receiver<T> {
    slot: Arc<Mutex<Option<Result<T, RequestError>>>>,
}

impl<T> Receiver<T> {
    /// Takes the result, if it was delivered and not taken before.
    #[inline]
    pub fn try_recv(&self) -> Option<Result<T, RequestError>> {
        self.slot.lock().take()
    }
}
