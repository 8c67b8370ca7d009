//! Page ownership and handler-set installation.

use tracing::{debug, trace};

use crate::error::SessionError;
use crate::handlers::{Action, HandlerSet, Key};
use crate::page::Page;

/// Owns the current page and the one handler set that is live for it.
///
/// Every successful [`enter`](Self::enter) bumps the epoch. Work started on
/// behalf of a page (question streams) is tagged with the epoch at start, so
/// results that arrive after the page was left can be recognised and dropped.
#[derive(Debug, Clone)]
pub struct PageController {
    page: Page,
    handlers: HandlerSet,
    epoch: u64,
}

impl PageController {
    pub fn new(initial: Page) -> Self {
        Self {
            page: initial,
            handlers: HandlerSet::for_page(initial, false),
            epoch: 0,
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn is_terminal(&self) -> bool {
        self.page.is_terminal()
    }

    /// Move to `page`, replacing the installed handler set.
    ///
    /// The previous page's set is dropped by the assignment; no binding of
    /// it survives into the new page. Returns the new epoch.
    pub fn enter(&mut self, page: Page, demo_taken: bool) -> Result<u64, SessionError> {
        if !self.page.can_enter(page) {
            return Err(SessionError::InvalidTransition {
                from: self.page,
                to: page,
            });
        }
        let from = self.page;
        self.page = page;
        self.epoch += 1;
        self.handlers = HandlerSet::for_page(page, demo_taken);
        debug!(%from, to = %page, epoch = self.epoch, "page entered");
        Ok(self.epoch)
    }

    /// Return the demo-taken Instructions page after a demo.
    ///
    /// This is the one edge back along the chain, so it is spelled out
    /// instead of going through [`enter`](Self::enter) with a flag.
    pub fn return_from_demo(&mut self) -> Result<u64, SessionError> {
        if self.page != Page::Demo {
            return Err(SessionError::InvalidTransition {
                from: self.page,
                to: Page::Instructions,
            });
        }
        self.enter(Page::Instructions, true)
    }

    /// Resolve a key against the installed set.
    pub fn dispatch(&self, key: Key) -> Result<Action, SessionError> {
        match self.handlers.lookup(key) {
            Some(action) => Ok(action),
            None => {
                trace!(%key, page = %self.page, "key not bound on this page");
                Err(SessionError::InputOutOfContext {
                    key,
                    page: self.page,
                })
            }
        }
    }
}
