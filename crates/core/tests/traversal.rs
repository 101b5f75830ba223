mod common;

use std::collections::HashMap;

use common::jitted;
use jitlens_core::services::symbols::local_label;
use jitlens_core::services::traversal::Scheduler;
use proptest::prelude::*;

#[test]
fn dequeues_in_fifo_order() {
    let mut scheduler = Scheduler::new(3);
    assert_eq!(scheduler.max_depth(), 3);
    assert!(scheduler.is_empty());
    assert!(scheduler.enqueue(jitted("A", 0x10_0000, 4), 0));
    assert!(scheduler.enqueue(jitted("B", 0x20_0000, 4), 1));
    assert!(scheduler.enqueue(jitted("C", 0x30_0000, 4), 1));
    let order: Vec<String> =
        std::iter::from_fn(|| scheduler.next()).map(|item| item.function.signature).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    assert!(scheduler.is_empty());
}

#[test]
fn rejects_items_deeper_than_max() {
    let mut scheduler = Scheduler::new(1);
    assert!(scheduler.enqueue(jitted("A", 0x10_0000, 4), 1));
    assert!(!scheduler.enqueue(jitted("B", 0x20_0000, 4), 2));
    assert_eq!(scheduler.pending(), 1);
}

#[test]
fn a_function_is_handed_out_once_even_if_queued_twice() {
    let mut scheduler = Scheduler::new(5);
    let a = jitted("A", 0x10_0000, 4);
    scheduler.enqueue(a.clone(), 0);
    scheduler.enqueue(a.clone(), 1);
    assert!(scheduler.next().is_some());
    assert!(scheduler.is_seen(a.identity()));
    assert!(scheduler.next().is_none());
    assert!(!scheduler.enqueue(a, 2));
}

#[test]
fn identity_is_the_code_address_not_the_name() {
    let mut scheduler = Scheduler::new(5);
    scheduler.enqueue(jitted("Overload", 0x10_0000, 4), 0);
    scheduler.enqueue(jitted("Overload", 0x20_0000, 4), 1);
    assert!(scheduler.next().is_some());
    assert!(scheduler.next().is_some());
}

proptest! {
    #[test]
    fn traversal_of_any_call_graph_is_bounded(
        edges in proptest::collection::vec(proptest::collection::vec(0usize..8, 0..4), 8),
        max_depth in 0u32..4,
    ) {
        let functions: Vec<_> = (0..8u64)
            .map(|i| jitted(&format!("F{i}"), 0x10_0000 * (i + 1), 16))
            .collect();
        let mut scheduler = Scheduler::new(max_depth);
        scheduler.enqueue(functions[0].clone(), 0);

        let mut processed: HashMap<u64, u32> = HashMap::new();
        while let Some(item) = scheduler.next() {
            prop_assert!(item.depth <= max_depth);
            let index = (item.function.native_code / 0x10_0000 - 1) as usize;
            *processed.entry(item.function.identity()).or_default() += 1;
            for callee in &edges[index] {
                if !scheduler.is_seen(functions[*callee].identity()) {
                    scheduler.enqueue(functions[*callee].clone(), item.depth + 1);
                }
            }
        }
        prop_assert!(processed.values().all(|count| *count == 1));
        prop_assert_eq!(processed.get(&functions[0].identity()), Some(&1));
    }

    #[test]
    fn local_labels_are_four_lowercase_hex_digits(offset in 0u64..0x1_0000) {
        let label = local_label(offset);
        prop_assert_eq!(label.len(), 5);
        prop_assert!(label.starts_with('L'));
        prop_assert!(label[1..].chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(u64::from_str_radix(&label[1..], 16).unwrap(), offset);
    }
}
