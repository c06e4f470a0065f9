//! FIFO of authentication requests with a single active slot.

use std::collections::VecDeque;

use crate::auth::AuthRequest;

#[derive(Debug, Default)]
pub struct RequestQueue {
    active: Option<AuthRequest>,
    waiting: VecDeque<AuthRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: AuthRequest) {
        self.waiting.push_back(request);
    }

    pub fn active(&self) -> Option<&AuthRequest> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut AuthRequest> {
        self.active.as_mut()
    }

    /// Requests waiting behind the active one.
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Active and waiting requests together.
    pub fn len(&self) -> usize {
        self.waiting.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the oldest waiting request active if the slot is free.
    ///
    /// Returns the newly activated request.
    pub fn promote(&mut self) -> Option<&mut AuthRequest> {
        if self.active.is_some() {
            return None;
        }
        self.active = self.waiting.pop_front();
        self.active.as_mut()
    }

    /// Remove the active request.
    pub fn finish_active(&mut self) -> Option<AuthRequest> {
        self.active.take()
    }
}
