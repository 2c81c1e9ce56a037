use super::*;

#[test]
fn test_owned_accessors() {
    let handle = Ownership::Owned(42u64);
    assert_eq!(*handle.get(), 42);
    assert!(handle.is_owned());
    assert!(!handle.is_external());
}

#[test]
fn test_external_accessors() {
    let handle = Ownership::External("borrowed");
    assert_eq!(*handle.get(), "borrowed");
    assert!(handle.is_external());
    assert!(!handle.is_owned());
}

#[test]
fn test_get_mut() {
    let mut handle = Ownership::Owned(vec![1u32]);
    handle.get_mut().push(2);
    assert_eq!(handle.get(), &vec![1, 2]);
}

#[test]
fn test_take_owned_yields_owned_handle() {
    let handle = Ownership::Owned(7u32);
    assert_eq!(handle.take_owned(), Some(7));
}

#[test]
fn test_take_owned_refuses_external_handle() {
    let handle = Ownership::External(7u32);
    assert_eq!(handle.take_owned(), None);
}
