/// Tagged ownership for handles that may be borrowed from a host application.
///
/// Instance and device handles (and the buffer data pointer) can either be
/// created by this core or supplied externally. Destruction code must free
/// the former and never the latter; tagging the handle at the type level
/// makes it impossible to lose track of which case applies.
///
/// # Example
///
/// ```ignore
/// let handle = Ownership::Owned(instance);
/// if let Some(instance) = handle.take_owned() {
///     unsafe { instance.destroy_instance(None) };
/// }
/// ```
#[derive(Debug, Clone)]
pub enum Ownership<T> {
    /// Created by this core; destruction frees it
    Owned(T),
    /// Supplied by the host application; destruction leaves it alone
    External(T),
}

impl<T> Ownership<T> {
    /// Access the wrapped handle regardless of ownership
    pub fn get(&self) -> &T {
        match self {
            Ownership::Owned(value) => value,
            Ownership::External(value) => value,
        }
    }

    /// Mutable access to the wrapped handle regardless of ownership
    pub fn get_mut(&mut self) -> &mut T {
        match self {
            Ownership::Owned(value) => value,
            Ownership::External(value) => value,
        }
    }

    /// Whether destruction is this core's responsibility
    pub fn is_owned(&self) -> bool {
        matches!(self, Ownership::Owned(_))
    }

    /// Whether the handle belongs to the host application
    pub fn is_external(&self) -> bool {
        matches!(self, Ownership::External(_))
    }

    /// Consume the wrapper, yielding the handle only when it is owned.
    ///
    /// Destruction paths use this: `Some` means "free it", `None` means
    /// "someone else will".
    pub fn take_owned(self) -> Option<T> {
        match self {
            Ownership::Owned(value) => Some(value),
            Ownership::External(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "ownership_tests.rs"]
mod tests;
