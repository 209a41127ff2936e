use std::{collections::HashSet, iter::FusedIterator};

use winvmi_core::{AccessContext, Pa, Va, VmiCore, VmiDriver};

use crate::EnumError;

#[derive(Debug, Clone, Copy)]
enum State {
    Start,
    At(Va),
    Broken(Va),
    Done,
}

/// An iterator for traversing list entries.
///
/// Walks a guest `LIST_ENTRY` chain by following forward links and yields
/// the address of each containing structure. The walk is guarded: it ends
/// on a null or self link, reports [`EnumError::Truncated`] when it exceeds
/// its bound or meets an entry twice, and reports [`EnumError::BrokenLink`]
/// when a link cannot be read. Nothing is yielded after an error.
pub struct ListEntryIterator<'a, Driver>
where
    Driver: VmiDriver,
{
    vmi: &'a VmiCore<Driver>,
    root: Pa,
    state: State,

    /// Address of the list head.
    list_head: Va,

    /// Offset to the containing structure.
    ///
    /// The offset is subtracted from the entry address to get the containing
    /// structure, similar to the `CONTAINING_RECORD` macro in the Windows
    /// kernel.
    offset: u64,

    /// Pointer width of the list, 8 or 4.
    width: usize,

    /// Whether the list head is itself an entry (a ring without a sentinel).
    include_head: bool,

    visited: HashSet<Va>,
    limit: usize,
}

impl<'a, Driver> ListEntryIterator<'a, Driver>
where
    Driver: VmiDriver,
{
    /// Creates an iterator over a list with a sentinel head.
    ///
    /// The head itself is not yielded.
    pub fn new(
        vmi: &'a VmiCore<Driver>,
        root: Pa,
        list_head: Va,
        offset: u64,
        width: usize,
        limit: usize,
    ) -> Self {
        Self {
            vmi,
            root,
            state: State::Start,
            list_head,
            offset,
            width,
            include_head: false,
            visited: HashSet::new(),
            limit,
        }
    }

    /// Creates an iterator over a ring that starts at one of its entries.
    ///
    /// The starting entry is yielded first.
    pub fn ring(
        vmi: &'a VmiCore<Driver>,
        root: Pa,
        anchor: Va,
        offset: u64,
        width: usize,
        limit: usize,
    ) -> Self {
        Self {
            include_head: true,
            ..Self::new(vmi, root, anchor, offset, width, limit)
        }
    }

    fn read_link(&self, entry: Va) -> Option<Va> {
        self.vmi
            .read_va(AccessContext::paging(entry, self.root), self.width)
            .ok()
    }

    fn finish(&mut self, result: Option<Result<Va, EnumError>>) -> Option<Result<Va, EnumError>> {
        self.state = State::Done;
        result
    }

    fn __next(&mut self) -> Option<Result<Va, EnumError>> {
        let entry = match self.state {
            State::Done => return None,
            State::Start if self.include_head => self.list_head,
            State::Start => match self.read_link(self.list_head) {
                Some(flink) if flink == self.list_head => return self.finish(None),
                Some(flink) => flink,
                None => {
                    tracing::debug!(list_head = %self.list_head, "unreadable list head");
                    return self.finish(Some(Err(EnumError::BrokenLink)));
                }
            },
            State::At(entry) if entry == self.list_head => return self.finish(None),
            State::At(entry) => entry,
            State::Broken(entry) => {
                tracing::debug!(%entry, "unreadable list link");
                return self.finish(Some(Err(EnumError::BrokenLink)));
            }
        };

        if entry.is_null() {
            return self.finish(None);
        }

        if self.visited.len() >= self.limit {
            tracing::debug!(limit = self.limit, "list walk exceeded its bound");
            return self.finish(Some(Err(EnumError::Truncated)));
        }

        if !self.visited.insert(entry) {
            tracing::debug!(%entry, "list entry visited twice");
            return self.finish(Some(Err(EnumError::Truncated)));
        }

        self.state = match self.read_link(entry) {
            Some(next) if next == entry => State::Done,
            Some(next) => State::At(next),
            None => State::Broken(entry),
        };

        Some(Ok(entry.wrapping_sub(self.offset)))
    }
}

impl<Driver> Iterator for ListEntryIterator<'_, Driver>
where
    Driver: VmiDriver,
{
    type Item = Result<Va, EnumError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.__next()
    }
}

impl<Driver> FusedIterator for ListEntryIterator<'_, Driver> where Driver: VmiDriver {}
