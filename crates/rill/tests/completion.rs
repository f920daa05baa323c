//! Completion semantics: hand-off on completion, take-style self-removal,
//! alive-counter auto-completion.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{ints, observer};
use rill::{
    EventStream, Link, LinkInput, Network, NetworkRef, Outcome, Reactive, SharedReactive, Value,
};

#[test]
fn concat_switches_to_second_stream_on_completion() {
    let a: SharedReactive = EventStream::new("a");
    let b: SharedReactive = EventStream::new("b");
    let out: SharedReactive = EventStream::new("out");

    // While `a` runs, `b` just queues. When `a` completes, its link's
    // complete_fn splices in the link that drains `b`.
    let b_for_switch = b.clone();
    let out_for_switch = out.clone();
    let first = Link::new("concat-a", vec![a.clone()], &[out.clone()])
        .with_complete_on_remove(vec![out.clone()])
        .with_complete_fn(Arc::new(move |_link, _completed| {
            Some(Outcome::add_links(vec![Link::new(
                "concat-b",
                vec![b_for_switch.clone()],
                &[out_for_switch.clone()],
            )
            .with_complete_on_remove(vec![out_for_switch.clone()])]))
        }));

    let (observe, seen) = observer(&out);
    let netref = NetworkRef::spawn(Network::new("concat-net"));
    netref.add_links(vec![first, observe]);

    netref.push(&b, Value::int(10));
    netref.push(&b, Value::int(20));
    netref.sync();
    // Nothing flows while `a` is still the active side.
    assert!(seen.lock().is_empty());

    netref.complete(&a);
    netref.push(&b, Value::int(30));
    netref.sync();

    assert_eq!(*seen.lock(), ints(&[10, 20, 30]));
    assert!(!out.completed());
    netref.shutdown();
}

#[test]
fn take_two_completes_the_derived_stream() {
    let s: SharedReactive = EventStream::new("s");
    let out: SharedReactive = EventStream::new("out");

    let taken = Arc::new(AtomicUsize::new(0));
    let take = Link::new("take2", vec![s.clone()], &[out.clone()])
        .with_complete_on_remove(vec![out.clone()])
        .with_link_fn(Arc::new(move |input: &LinkInput| {
            let Some((_, occurrence)) = input.input_occurrences.first() else {
                return Ok(None);
            };
            let mut outcome = input.broadcast(occurrence.clone());
            if taken.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                outcome.remove_by = Some(Arc::new(|link: &Link| &*link.label == "take2"));
            }
            Ok(Some(outcome))
        }));

    let (observe, seen) = observer(&out);
    let netref = NetworkRef::spawn(Network::new("take-net"));
    netref.add_links(vec![take, observe]);

    netref.push(&s, Value::int(1));
    netref.push(&s, Value::int(2));
    netref.push(&s, Value::int(3));
    netref.sync();

    assert_eq!(*seen.lock(), ints(&[1, 2]));
    assert!(out.completed());
    // The source keeps the third value; nothing consumes it any more.
    assert!(s.available());
    netref.shutdown();
}

#[test]
fn auto_completion_waits_for_every_declaring_link() {
    let s: SharedReactive = EventStream::new("s");
    let out: SharedReactive = EventStream::new("out");

    let netref = NetworkRef::spawn(Network::new("holds-net"));
    netref.add_links(vec![
        Link::new("hold-x", vec![s.clone()], &[out.clone()])
            .with_complete_on_remove(vec![out.clone()]),
        Link::new("hold-y", vec![s.clone()], &[out.clone()])
            .with_complete_on_remove(vec![out.clone()]),
    ]);

    netref.remove_links(|link| &*link.label == "hold-x");
    netref.sync();
    assert!(!out.completed());

    netref.remove_links(|link| &*link.label == "hold-y");
    netref.sync();
    assert!(out.completed());
    netref.shutdown();
}

#[test]
fn completed_stream_drops_further_deliveries() {
    let s: SharedReactive = EventStream::new("s");
    let (observe, seen) = observer(&s);

    let netref = NetworkRef::spawn(Network::new("drop-net"));
    netref.add_links(vec![observe]);

    netref.complete(&s);
    netref.push(&s, Value::int(5));
    netref.sync();

    assert!(s.completed());
    assert!(seen.lock().is_empty());
    netref.shutdown();
}

#[test]
fn completing_an_input_removes_its_links() {
    let s: SharedReactive = EventStream::new("s");
    let out: SharedReactive = EventStream::new("out");

    let (observe, seen) = observer(&out);
    let netref = NetworkRef::spawn(Network::new("cut-net"));
    netref.add_links(vec![Link::new("s-out", vec![s.clone()], &[out.clone()]), observe]);

    netref.push(&s, Value::int(1));
    netref.complete(&s);
    // Values after completion never reach downstream.
    netref.push(&s, Value::int(2));
    netref.sync();

    assert_eq!(*seen.lock(), ints(&[1]));
    netref.shutdown();
}

#[test]
fn values_queued_before_completion_still_drain() {
    let s: SharedReactive = EventStream::new("s");
    let out: SharedReactive = EventStream::new("out");

    let (observe, seen) = observer(&out);
    let netref = NetworkRef::spawn(Network::new("drain-net"));
    netref.add_links(vec![Link::new("s-out", vec![s.clone()], &[out.clone()]), observe]);

    // Deliver two values and the completion in a single stimulus: the
    // queued values precede the sentinel and must still be observed.
    netref.enqueue(rill::Stimulus::delivery(s.clone(), rill::Occurrence::now(Value::int(1)))
        .with_delivery(s.clone(), rill::Occurrence::now(Value::int(2)))
        .with_delivery(s.clone(), rill::Occurrence::completed()));
    netref.sync();

    assert_eq!(*seen.lock(), ints(&[1, 2]));
    assert!(s.completed());
    netref.shutdown();
}
