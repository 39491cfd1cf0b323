mod fs;

pub use self::fs::FsDocumentStore;
