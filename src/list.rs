/*
 * Intrusive list primitives.
 *
 * Items are linked by `ThreadHandle` rather than raw pointer, with the
 * arena a plain `Vec<Thread>`; a detached item is a self-loop
 * (`prev == next == self`).
 *
 * Every thread carries two independent link slots — one for whichever
 * queue currently holds its *scheduling* item (a ready queue or a
 * sync-object waiter queue; a thread is in at most one at a time) and
 * one for its *delay* item (the normal or overflow delay queue). Both
 * slots are driven by the same generic algorithms below, parameterized
 * by the `LinkField` that knows which pair of fields to touch, so
 * `sched.rs` and the delay queues share one implementation instead of
 * two near-duplicates.
 */

use crate::thread::{Thread, ThreadHandle};

/// prev/next for one link slot. Detached is represented the same way
/// the original does: both pointers loop back to the owner itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub prev: ThreadHandle,
    pub next: ThreadHandle,
}

impl Link {
    pub fn detached(owner: ThreadHandle) -> Self {
        Link { prev: owner, next: owner }
    }
}

/// Selects which of a thread's two link slots (scheduling item or delay
/// item) a given list algorithm operates on.
pub trait LinkField {
    fn link(t: &Thread) -> Link;
    fn set_link(t: &mut Thread, link: Link);
    fn tag(t: &Thread) -> i64;
    fn set_tag(t: &mut Thread, tag: i64);
    fn is_detached(t: &Thread) -> bool {
        let l = Self::link(t);
        l.prev == l.next
    }
}

pub struct SchedField;
impl LinkField for SchedField {
    fn link(t: &Thread) -> Link {
        t.sched_link
    }
    fn set_link(t: &mut Thread, link: Link) {
        t.sched_link = link;
    }
    fn tag(t: &Thread) -> i64 {
        t.sched_tag
    }
    fn set_tag(t: &mut Thread, tag: i64) {
        t.sched_tag = tag;
    }
}

pub struct DelayField;
impl LinkField for DelayField {
    fn link(t: &Thread) -> Link {
        t.delay_link
    }
    fn set_link(t: &mut Thread, link: Link) {
        t.delay_link = link;
    }
    fn tag(t: &Thread) -> i64 {
        t.delay_tag as i64
    }
    fn set_tag(t: &mut Thread, tag: i64) {
        t.delay_tag = tag as u32;
    }
}

fn get(arena: &[Thread], h: ThreadHandle) -> &Thread {
    &arena[h.index()]
}

fn get_mut(arena: &mut [Thread], h: ThreadHandle) -> &mut Thread {
    &mut arena[h.index()]
}

/// Initialize an item as detached: self-loop, tag cleared. Caller is
/// responsible for clearing the owning-list marker on the TCB itself
/// (`Thread::sched_owner`/`delay_owner`), which lives outside this
/// module because only the scheduler/objects know which enum of
/// "owners" applies.
pub fn item_init<F: LinkField>(arena: &mut [Thread], item: ThreadHandle) {
    F::set_link(get_mut(arena, item), Link::detached(item));
    F::set_tag(get_mut(arena, item), 0);
}

/// Append `item` before `head` (i.e. at the tail of the circular list).
/// If the list was empty, `item` becomes the head.
pub fn fifo_enqueue<F: LinkField>(arena: &mut [Thread], head: &mut Option<ThreadHandle>, item: ThreadHandle) {
    debug_assert!(F::is_detached(get(arena, item)), "fifo_enqueue: item already linked");
    match *head {
        None => {
            F::set_link(get_mut(arena, item), Link::detached(item));
            *head = Some(item);
        }
        Some(h) => {
            let tail = F::link(get(arena, h)).prev;
            let mut link = F::link(get(arena, item));
            link.prev = tail;
            link.next = h;
            F::set_link(get_mut(arena, item), link);

            let mut tail_link = F::link(get(arena, tail));
            tail_link.next = item;
            F::set_link(get_mut(arena, tail), tail_link);

            let mut head_link = F::link(get(arena, h));
            head_link.prev = item;
            F::set_link(get_mut(arena, h), head_link);
        }
    }
}

/// Priority-ordered insert: after the last item with `tag <= new tag`
/// (equal tags keep insertion order, i.e. new item goes after existing
/// equal-tag items — FIFO among equals).
pub fn prio_enqueue<F: LinkField>(
    arena: &mut [Thread],
    head: &mut Option<ThreadHandle>,
    item: ThreadHandle,
    tag: i64,
) {
    debug_assert!(F::is_detached(get(arena, item)), "prio_enqueue: item already linked");
    F::set_tag(get_mut(arena, item), tag);

    let Some(h) = *head else {
        F::set_link(get_mut(arena, item), Link::detached(item));
        *head = Some(item);
        return;
    };

    let head_tag = F::tag(get(arena, h));
    if tag < head_tag {
        // New smallest tag: becomes the head.
        insert_before(arena, h, item);
        *head = Some(item);
        return;
    }

    // Walk from the second item looking for the first strictly-greater
    // tag; insert before it. If none found, append at the tail.
    let mut cursor = F::link(get(arena, h)).next;
    while cursor != h {
        if F::tag(get(arena, cursor)) > tag {
            insert_before(arena, cursor, item);
            return;
        }
        cursor = F::link(get(arena, cursor)).next;
    }
    insert_before(arena, h, item); // append at tail (before head, i.e. after old tail)
}

fn insert_before<F: LinkField>(arena: &mut [Thread], pos: ThreadHandle, item: ThreadHandle) {
    let pos_prev = F::link(get(arena, pos)).prev;

    let mut link = F::link(get(arena, item));
    link.prev = pos_prev;
    link.next = pos;
    F::set_link(get_mut(arena, item), link);

    let mut prev_link = F::link(get(arena, pos_prev));
    prev_link.next = item;
    F::set_link(get_mut(arena, pos_prev), prev_link);

    let mut pos_link = F::link(get(arena, pos));
    pos_link.prev = item;
    F::set_link(get_mut(arena, pos), pos_link);
}

/// Detach the head and return it; the next item becomes the head.
pub fn pop<F: LinkField>(arena: &mut [Thread], head: &mut Option<ThreadHandle>) -> Option<ThreadHandle> {
    let h = (*head)?;
    remove_item::<F>(arena, head, h);
    Some(h)
}

/// FIFO-only O(1) rotation: head becomes head.next, without detaching
/// anything. Equivalent to pop-then-enqueue for a circular list.
pub fn rotate<F: LinkField>(arena: &[Thread], head: &mut Option<ThreadHandle>) {
    if let Some(h) = *head {
        let next = F::link(get(arena, h)).next;
        *head = Some(next);
    }
}

/// Detach `item` from whichever list it is currently linked into,
/// updating `head` if `item` was the head. No-op (besides the debug
/// assert) if already detached.
pub fn remove_item<F: LinkField>(arena: &mut [Thread], head: &mut Option<ThreadHandle>, item: ThreadHandle) {
    let link = F::link(get(arena, item));
    if link.prev == item && link.next == item {
        // Already detached; removing the sole remaining item of an
        // otherwise-empty list still needs head cleared.
        if *head == Some(item) {
            *head = None;
        }
        return;
    }

    let prev = link.prev;
    let next = link.next;

    let mut prev_link = F::link(get(arena, prev));
    prev_link.next = next;
    F::set_link(get_mut(arena, prev), prev_link);

    let mut next_link = F::link(get(arena, next));
    next_link.prev = prev;
    F::set_link(get_mut(arena, next), next_link);

    F::set_link(get_mut(arena, item), Link::detached(item));

    if *head == Some(item) {
        *head = if next == item { None } else { Some(next) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::make_arena;

    #[test]
    fn enqueue_remove_round_trips_to_detached() {
        let mut arena = make_arena(3);
        let mut head = None;
        let a = ThreadHandle::from_index(0);
        fifo_enqueue::<SchedField>(&mut arena, &mut head, a);
        remove_item::<SchedField>(&mut arena, &mut head, a);
        assert!(SchedField::is_detached(&arena[0]));
        assert_eq!(SchedField::tag(&arena[0]), 0);
        assert_eq!(head, None);
    }

    #[test]
    fn prio_enqueue_pops_non_decreasing() {
        let mut arena = make_arena(5);
        let mut head = None;
        let tags = [30i64, 10, 20, 10, 5];
        for (i, &tag) in tags.iter().enumerate() {
            let h = ThreadHandle::from_index(i);
            prio_enqueue::<SchedField>(&mut arena, &mut head, h, tag);
        }
        let mut popped = vec![];
        while let Some(h) = pop::<SchedField>(&mut arena, &mut head) {
            popped.push(SchedField::tag(&arena[h.index()]));
        }
        let mut sorted = popped.clone();
        sorted.sort();
        assert_eq!(popped, sorted);
    }

    #[test]
    fn equal_tags_are_fifo() {
        let mut arena = make_arena(3);
        let mut head = None;
        let a = ThreadHandle::from_index(0);
        let b = ThreadHandle::from_index(1);
        prio_enqueue::<SchedField>(&mut arena, &mut head, a, 7);
        prio_enqueue::<SchedField>(&mut arena, &mut head, b, 7);
        let first = pop::<SchedField>(&mut arena, &mut head).unwrap();
        assert_eq!(first, a);
        let second = pop::<SchedField>(&mut arena, &mut head).unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn fifo_rotate_moves_head_without_detaching() {
        let mut arena = make_arena(3);
        let mut head = None;
        for i in 0..3 {
            fifo_enqueue::<SchedField>(&mut arena, &mut head, ThreadHandle::from_index(i));
        }
        let first_head = head;
        rotate::<SchedField>(&arena, &mut head);
        assert_ne!(head, first_head);
        assert!(!SchedField::is_detached(&arena[0]));
    }
}
