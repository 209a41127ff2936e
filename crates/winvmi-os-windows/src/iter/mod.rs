mod list;

pub use self::list::ListEntryIterator;
