/*!
 * Handle Lists
 *
 * Liveness tracking for caller-held handles. Each attach hands out a token;
 * detach returns it. Teardown checks the list is empty instead of relying on
 * reference counts, so a leaked handle blocks reset the same way an attached
 * one does.
 */

/// Identifies one attached handle within its list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleToken(u64);

#[derive(Debug, Default)]
pub struct HandleList {
    next: u64,
    live: Vec<u64>,
}

impl HandleList {
    pub const fn new() -> Self {
        Self {
            next: 0,
            live: Vec::new(),
        }
    }

    pub fn attach(&mut self) -> HandleToken {
        let token = self.next;
        self.next = self.next.wrapping_add(1);
        self.live.push(token);
        HandleToken(token)
    }

    /// Returns false if the token was not attached
    pub fn detach(&mut self, token: HandleToken) -> bool {
        match self.live.iter().position(|&t| t == token.0) {
            Some(idx) => {
                self.live.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, token: HandleToken) -> bool {
        self.live.contains(&token.0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Drop every token; used when the owner is torn down
    pub fn clear(&mut self) {
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach() {
        let mut list = HandleList::new();
        let a = list.attach();
        let b = list.attach();
        assert_ne!(a, b);
        assert_eq!(list.len(), 2);

        assert!(list.detach(a));
        assert!(!list.detach(a));
        assert!(list.contains(b));
        assert!(list.detach(b));
        assert!(list.is_empty());
    }
}
