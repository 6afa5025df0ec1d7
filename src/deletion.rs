// Deletion stack - LIFO release list for native handles
//
// Every subsystem pushes the release of what it just created, so `free`
// replays teardown in the inverse of acquisition order. Actions get a context
// at release time: owners that keep objects in fields (see `Renderer`) pass
// themselves, owners whose handles are fixed at push time use `defer`.

use std::fmt;

type ReleaseAction<C> = Box<dyn FnOnce(&mut C)>;

pub struct DeletionStack<C = ()> {
    name: &'static str,
    actions: Vec<ReleaseAction<C>>,
}

impl<C> DeletionStack<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            actions: Vec::new(),
        }
    }

    /// Append a release action. Actions must not fail.
    pub fn push<F>(&mut self, action: F)
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.actions.push(Box::new(action));
        log::trace!("[{}] queued release #{}", self.name, self.actions.len());
    }

    /// Run every queued action in reverse insertion order, leaving the stack empty.
    pub fn free_with(&mut self, ctx: &mut C) {
        if self.actions.is_empty() {
            return;
        }

        let count = self.actions.len();
        log::debug!("[{}] releasing {} objects", self.name, count);

        while let Some(action) = self.actions.pop() {
            action(ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl DeletionStack<()> {
    /// Queue a release that needs no context.
    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.push(move |_| action());
    }

    pub fn free(&mut self) {
        self.free_with(&mut ());
    }
}

impl<C> Default for DeletionStack<C> {
    fn default() -> Self {
        Self::new("deletion")
    }
}

impl<C> fmt::Debug for DeletionStack<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionStack")
            .field("name", &self.name)
            .field("pending", &self.actions.len())
            .finish()
    }
}

impl<C> Drop for DeletionStack<C> {
    fn drop(&mut self) {
        // Running the actions here could destroy handles the GPU still reads.
        if !self.actions.is_empty() {
            log::warn!(
                "[{}] dropped with {} pending releases, handles leaked",
                self.name,
                self.actions.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn free_runs_actions_in_reverse_order() {
        let mut stack = DeletionStack::<Vec<&'static str>>::new("test");
        stack.push(|log| log.push("a"));
        stack.push(|log| log.push("b"));
        stack.push(|log| log.push("c"));
        assert_eq!(stack.len(), 3);

        let mut log = Vec::new();
        stack.free_with(&mut log);

        assert_eq!(log, vec!["c", "b", "a"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn free_on_empty_stack_is_a_no_op() {
        let mut stack = DeletionStack::new("empty");
        stack.free();
        stack.free();
        assert!(stack.is_empty());
    }

    #[test]
    fn stack_is_reusable_after_free() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut stack = DeletionStack::new("reuse");

        let o = Rc::clone(&order);
        stack.defer(move || o.borrow_mut().push(1));
        stack.free();

        let o = Rc::clone(&order);
        stack.defer(move || o.borrow_mut().push(2));
        let o = Rc::clone(&order);
        stack.defer(move || o.borrow_mut().push(3));
        stack.free();

        assert_eq!(*order.borrow(), vec![1, 3, 2]);
    }

    #[test]
    fn each_action_runs_exactly_once() {
        let hits = Rc::new(RefCell::new(0));
        let mut stack = DeletionStack::new("once");
        let h = Rc::clone(&hits);
        stack.defer(move || *h.borrow_mut() += 1);

        stack.free();
        stack.free();

        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn dropping_pending_stack_does_not_run_actions() {
        let hits = Rc::new(RefCell::new(0));
        {
            let mut stack = DeletionStack::new("leak");
            let h = Rc::clone(&hits);
            stack.defer(move || *h.borrow_mut() += 1);
        }
        assert_eq!(*hits.borrow(), 0);
    }
}
