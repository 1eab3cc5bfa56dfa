/// Default on-disk page size. Index fragments may request a different
/// power-of-two size at creation time (§3 Index.page_size); the in-memory
/// layout code is written against this constant because the teacher crate
/// (and this one) keeps the page buffer as a fixed-size array rather than a
/// boxed slice, trading configurability for avoiding an allocation per page.
pub const PAGE_SIZE: usize = 8192;

/// Number of 4-byte words in a descriptor page (§4.2).
pub const DESC_PAGE_WORDS: usize = 512;
pub const DESC_PAGE_SIZE: usize = DESC_PAGE_WORDS * 4;
