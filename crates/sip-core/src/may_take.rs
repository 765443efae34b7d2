use std::ops::{Deref, DerefMut};

/// Wrapper over a `&mut Option<T>` handed to layers and usages.
///
/// The receiver may inspect the value through deref or take ownership of
/// it, which stops any further dispatching of the value.
pub struct MayTake<'v, T> {
    value: &'v mut Option<T>,
}

impl<'v, T> MayTake<'v, T> {
    pub fn new(value: &'v mut Option<T>) -> Self {
        Self { value }
    }

    pub fn take(self) -> T {
        self.value.take().expect("value was present on creation")
    }

    pub fn inner(&mut self) -> &mut Option<T> {
        self.value
    }
}

impl<T> Deref for MayTake<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("value was present on creation")
    }
}

impl<T> DerefMut for MayTake<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("value was present on creation")
    }
}
