//! Selection identity and viewport reconciliation.
//!
//! Selection is stored as a `ResourceIdentity`, never a row index. Each new
//! snapshot is reconciled against it: if the identity is still present the
//! selection follows it to its new index, otherwise the index clamps to the
//! nearest surviving row.

use crate::render::Row;
use crate::resource::ResourceIdentity;

#[derive(Debug, Clone, Default)]
pub struct Selection {
    identity: Option<ResourceIdentity>,
    index: Option<usize>,
    /// First visible row of the viewport.
    pub origin: usize,
}

impl Selection {
    pub fn identity(&self) -> Option<&ResourceIdentity> {
        self.identity.as_ref()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn clear(&mut self) {
        self.identity = None;
        self.index = None;
    }

    /// Select a specific row, remembering its identity.
    pub fn select(&mut self, rows: &[Row], index: usize) {
        if rows.is_empty() {
            self.clear();
            return;
        }
        let index = index.min(rows.len() - 1);
        self.index = Some(index);
        self.identity = Some(rows[index].identity.clone());
    }

    /// Move the selection by a signed amount, clamped to the row range.
    pub fn move_by(&mut self, rows: &[Row], delta: isize) {
        if rows.is_empty() {
            self.clear();
            return;
        }
        let current = self.index.unwrap_or(0);
        #[allow(clippy::cast_possible_wrap)]
        let target = (current as isize + delta).clamp(0, rows.len() as isize - 1);
        #[allow(clippy::cast_sign_loss)]
        self.select(rows, target as usize);
    }

    pub fn select_first(&mut self, rows: &[Row]) {
        self.select(rows, 0);
    }

    pub fn select_last(&mut self, rows: &[Row]) {
        if rows.is_empty() {
            self.clear();
        } else {
            self.select(rows, rows.len() - 1);
        }
    }

    /// Reconcile the stored identity against a new row set: follow the
    /// identity if it survived, otherwise clamp to `min(previousIndex,
    /// len-1)`, or clear when the set is empty.
    pub fn reconcile(&mut self, rows: &[Row]) {
        if rows.is_empty() {
            self.clear();
            return;
        }
        if let Some(identity) = &self.identity {
            if let Some(found) = rows.iter().position(|r| &r.identity == identity) {
                self.index = Some(found);
                return;
            }
        }
        let fallback = self.index.unwrap_or(0).min(rows.len() - 1);
        self.select(rows, fallback);
    }

    /// Adjust the viewport so the selected row is visible, preferring the
    /// prior origin when the selection already fits.
    pub fn ensure_visible(&mut self, height: usize) {
        let Some(index) = self.index else {
            self.origin = 0;
            return;
        };
        if height == 0 {
            self.origin = index;
            return;
        }
        if index < self.origin {
            self.origin = index;
        } else if index >= self.origin + height {
            self.origin = index + 1 - height;
        }
    }
}
