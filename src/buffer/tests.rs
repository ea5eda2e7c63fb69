//! Tests for [`MessageBuffer`] growth, truncation and disposal.

use proptest::prelude::*;
use rstest::rstest;

use super::{BufferError, MessageBuffer};

#[rstest]
#[case::no_resize(64)]
#[case::resize(2)]
#[case::from_empty(0)]
fn consecutive_writes_concatenate(#[case] baseline: usize) {
    let mut buffer = MessageBuffer::new(baseline);
    buffer.write(b"hello, ").expect("first write");
    buffer.write(b"world").expect("second write");

    assert_eq!(buffer.len(), 12);
    assert_eq!(buffer.as_slice().expect("live buffer"), b"hello, world");
    assert!(buffer.capacity() >= buffer.len());
}

#[test]
fn empty_buffer_grows_to_minimum_then_doubles() {
    let mut buffer = MessageBuffer::new(0);
    assert_eq!(buffer.capacity(), 0);

    buffer.write(&[1]).expect("write");
    assert_eq!(buffer.capacity(), 4);

    buffer.write(&[2, 3, 4, 5]).expect("write");
    assert_eq!(buffer.capacity(), 8);
}

#[test]
fn set_length_zero_fills_only_the_grown_range() {
    let mut buffer = MessageBuffer::new(8);
    buffer.write(&[1, 2, 3]).expect("write");

    buffer.set_length(1).expect("truncate");
    assert_eq!(buffer.as_slice().expect("live"), &[1]);

    buffer.set_length(4).expect("grow");
    assert_eq!(buffer.as_slice().expect("live"), &[1, 0, 0, 0]);
}

#[test]
fn set_length_past_capacity_grows_block() {
    let mut buffer = MessageBuffer::new(4);
    buffer.write(&[9; 4]).expect("write");

    buffer.set_length(10).expect("grow");

    assert!(buffer.capacity() >= 10);
    assert_eq!(&buffer.as_slice().expect("live")[..4], &[9; 4]);
    assert!(buffer.as_slice().expect("live")[4..].iter().all(|b| *b == 0));
}

#[test]
fn clear_keeps_capacity() {
    let mut buffer = MessageBuffer::new(4);
    buffer.write(&[7; 20]).expect("write");
    let capacity = buffer.capacity();

    buffer.clear().expect("clear");

    assert!(buffer.is_empty());
    assert_eq!(buffer.capacity(), capacity);
}

#[test]
fn shrink_returns_to_baseline_and_truncates() {
    let mut buffer = MessageBuffer::new(4);
    buffer.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).expect("write");
    assert!(buffer.capacity() > 4);

    buffer.shrink().expect("shrink");

    assert_eq!(buffer.capacity(), 4);
    assert_eq!(buffer.as_slice().expect("live"), &[1, 2, 3, 4]);
}

#[test]
fn shrink_keeps_short_contents() {
    let mut buffer = MessageBuffer::new(8);
    buffer.write(&[0; 32]).expect("write");
    buffer.set_length(3).expect("truncate");

    buffer.shrink().expect("shrink");

    assert_eq!(buffer.capacity(), 8);
    assert_eq!(buffer.len(), 3);
}

#[test]
fn growth_is_capped_by_limit() {
    let mut buffer = MessageBuffer::with_limit(4, 8);
    buffer.write(&[0; 6]).expect("within limit");
    assert_eq!(buffer.capacity(), 8);

    let err = buffer.write(&[0; 3]).expect_err("past limit");
    assert_eq!(
        err,
        BufferError::CapacityExceeded {
            requested: 9,
            limit: 8
        }
    );
    assert_eq!(buffer.len(), 6);
}

#[test]
fn disposed_buffer_rejects_every_operation() {
    let mut buffer = MessageBuffer::new(16);
    buffer.write(b"abc").expect("write");

    buffer.dispose();
    buffer.dispose();

    assert!(buffer.is_disposed());
    assert_eq!(buffer.capacity(), 0);
    assert_eq!(buffer.write(b"x"), Err(BufferError::Disposed));
    assert_eq!(buffer.set_length(1), Err(BufferError::Disposed));
    assert_eq!(buffer.clear(), Err(BufferError::Disposed));
    assert_eq!(buffer.shrink(), Err(BufferError::Disposed));
    assert_eq!(buffer.as_slice(), Err(BufferError::Disposed));
}

proptest! {
    #[test]
    fn write_then_write_yields_concatenation(
        baseline in 0_usize..64,
        a in proptest::collection::vec(any::<u8>(), 0..200),
        b in proptest::collection::vec(any::<u8>(), 0..200),
    ) {
        let mut buffer = MessageBuffer::new(baseline);
        buffer.write(&a).expect("write a");
        buffer.write(&b).expect("write b");

        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        prop_assert_eq!(buffer.len(), a.len() + b.len());
        prop_assert_eq!(buffer.as_slice().expect("live"), expected.as_slice());
    }

    #[test]
    fn set_length_zero_fills_regrown_bytes(
        baseline in 0_usize..32,
        data in proptest::collection::vec(1_u8..=u8::MAX, 1..128),
        cut in any::<prop::sample::Index>(),
        grow in 0_usize..128,
    ) {
        let mut buffer = MessageBuffer::new(baseline);
        buffer.write(&data).expect("write");
        let cut = cut.index(data.len() + 1);
        buffer.set_length(cut).expect("truncate");
        buffer.set_length(cut + grow).expect("regrow");

        let contents = buffer.as_slice().expect("live");
        prop_assert_eq!(contents.len(), cut + grow);
        prop_assert_eq!(&contents[..cut], &data[..cut]);
        prop_assert!(contents[cut..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn shrink_after_growth_restores_baseline(
        baseline in 1_usize..32,
        extra in 1_usize..256,
    ) {
        let mut buffer = MessageBuffer::new(baseline);
        buffer.write(&vec![1; baseline + extra]).expect("write");
        buffer.shrink().expect("shrink");

        prop_assert_eq!(buffer.capacity(), baseline);
        prop_assert_eq!(buffer.len(), baseline);
    }
}
