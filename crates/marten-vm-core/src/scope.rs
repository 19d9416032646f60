//! Scope chains
//!
//! A persistent singly linked list of scope objects. Pushing shares the
//! tail, so closures capture a chain by cloning one `Arc`.

use std::sync::Arc;

use crate::object::JsObject;

struct ScopeNode {
    object: Arc<JsObject>,
    next: ScopeChain,
}

/// Scope chain, innermost first
#[derive(Clone, Default)]
pub struct ScopeChain(Option<Arc<ScopeNode>>);

impl ScopeChain {
    /// Chain holding only `object`
    pub fn new(object: Arc<JsObject>) -> Self {
        Self::default().push(object)
    }

    /// Chain with `object` in front
    #[must_use]
    pub fn push(&self, object: Arc<JsObject>) -> Self {
        Self(Some(Arc::new(ScopeNode {
            object,
            next: self.clone(),
        })))
    }

    /// Chain without its innermost scope
    #[must_use]
    pub fn pop(&self) -> Self {
        self.0.as_ref().map_or_else(Self::default, |node| node.next.clone())
    }

    /// Chain without its `count` innermost scopes
    #[must_use]
    pub fn pop_n(&self, count: usize) -> Self {
        (0..count).fold(self.clone(), |chain, _| chain.pop())
    }

    /// Innermost scope object
    pub fn top(&self) -> Option<&Arc<JsObject>> {
        self.0.as_ref().map(|node| &node.object)
    }

    /// Scope object `skip` levels down
    pub fn nth(&self, skip: usize) -> Option<&Arc<JsObject>> {
        self.iter().nth(skip)
    }

    /// Outermost scope object (the global object for script code)
    pub fn bottom(&self) -> Option<&Arc<JsObject>> {
        self.iter().last()
    }

    /// Number of scopes
    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// Iterate innermost to outermost
    pub fn iter(&self) -> impl Iterator<Item = &Arc<JsObject>> {
        let mut current = self.0.as_deref();
        std::iter::from_fn(move || {
            let node = current?;
            current = node.next.0.as_deref();
            Some(&node.object)
        })
    }
}

impl std::fmt::Debug for ScopeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|object| object.class_name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::structure::Structure;

    #[test]
    fn test_push_pop_share_tail() {
        let global = JsObject::new(Structure::root(), ObjectKind::Global);
        let with = JsObject::new(Structure::root(), ObjectKind::Ordinary);
        let base = ScopeChain::new(Arc::clone(&global));
        let inner = base.push(Arc::clone(&with)).push(Arc::clone(&with));

        assert_eq!(inner.depth(), 3);
        assert!(Arc::ptr_eq(inner.top().unwrap(), &with));
        assert!(Arc::ptr_eq(inner.bottom().unwrap(), &global));
        assert!(Arc::ptr_eq(inner.nth(2).unwrap(), &global));
        assert_eq!(inner.pop_n(2).depth(), 1);
        assert_eq!(base.depth(), 1);
        assert_eq!(ScopeChain::default().pop().depth(), 0);
    }
}
