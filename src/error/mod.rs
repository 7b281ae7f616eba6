#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Error type for errors during ELF object handling
pub enum Error {
    #[error("An I/O error occurred: {kind}")]
    Io { kind: std::io::ErrorKind },
    #[error("File data ends before {what} at offset {offset:#x}")]
    TruncatedFile { what: String, offset: usize },
    #[error("String entry at offset {offset:#x} was not null-terminated")]
    UnterminatedString { offset: usize },
    #[error("Invalid schema directive: {line}")]
    InvalidDirective { line: String },
    #[error("Unknown field handler {name}")]
    UnknownFieldHandler { name: String },
    #[error("Unknown option handler {name}")]
    UnknownOptionHandler { name: String },
    #[error("Unknown alt handler {name}")]
    UnknownAltHandler { name: String },
    #[error("Unknown reference type {kind}")]
    UnknownReferenceKind { kind: String },
    #[error("Unknown ignore kind {kind} for field {field}")]
    UnknownIgnoreKind { kind: String, field: String },
    #[error("Missing table lookup {name} for field {field}")]
    MissingTableLookup { name: String, field: String },
    #[error("Invalid integer literal {value}")]
    InvalidIntLiteral { value: String },
    #[error("Invalid value {value} for ei_class")]
    InvalidElfClass { value: u64 },
    #[error("Invalid value {value} for ei_data")]
    InvalidElfDataEncoding { value: u64 },
    #[error("Record ended after {available} bytes, needed {needed} for field {field}")]
    ShortRecord {
        field: String,
        needed: usize,
        available: usize,
    },
    #[error("Enabled fields can't account for all fields: expected {expected} records, got {found}")]
    EnabledFieldMismatch { expected: usize, found: usize },
    #[error("Field {name} is enabled, but not present in input")]
    MissingInputField { name: String },
    #[error("No field named {name} on this record")]
    UnknownField { name: String },
    #[error("Field {name} does not hold an integer value")]
    NotAnInteger { name: String },
    #[error("{name} doesn't appear to be an enum field")]
    NotAnEnumField { name: String },
    #[error("{name} doesn't appear to be a bitmask field")]
    NotABitmaskField { name: String },
    #[error("Referenced into a non-table object for field {field}")]
    ReferencedNonTable { field: String },
    #[error("Could not find an item with value {value:#x} for field {field}")]
    FieldSearchMiss { field: String, value: u64 },
    #[error("No reference for {name}")]
    UnknownReference { name: String },
    #[error("Reference for {name} points at a vanished item")]
    DanglingReference { name: String },
    #[error("No section header at index {idx}")]
    NoSuchSectionHeader { idx: usize },
    #[error("Section body at index {idx} is not a table")]
    SectionBodyNotTable { idx: usize },
    #[error("No item at offset {offset:#x}")]
    NoItemAtOffset { offset: usize },
    #[error("Zero-size item at offset {offset:#x} would never exhaust the buffer")]
    ZeroSizeItem { offset: usize },
    #[error("Reorder sequence is not a permutation of the table")]
    BadReorder,
    #[error("Could not find section {name}")]
    SectionNotFound { name: String },
    #[error("Missing symbol {symbol} in {table}")]
    SymbolNotFound { symbol: String, table: String },
    #[error("Could not find a tag number {tag:#x} in the dynamic section")]
    TagNotFound { tag: u64 },
    #[error("Could not find a section matching address {addr:#x}")]
    NoSectionForPointer { addr: u64 },
    #[error("Unexpected number of {tag} tags: {count}")]
    UnexpectedTagCount { tag: String, count: usize },
    #[error("Version is outside allowed range (16-bit positive int): {version}")]
    VersionOutOfRange { version: i64 },
    #[error("Unknown version id: {version}")]
    UnknownVersionId { version: u64 },
    #[error("Tried to move progbits section {name}")]
    IllegalSectionMove { name: String },
    #[error("Unknown segment type: {name}")]
    UnknownSegmentType { name: String },
    #[error("Unknown segment flags: {flags}")]
    UnknownSegmentFlags { flags: String },
    #[error("Unknown dynamic tag {name}")]
    UnknownDynamicTag { name: String },
    #[error("Could not reconstruct a union field name for {tag}")]
    NoUnionField { tag: String },
    #[error("Start section {start} started after end section {end}: {start_off:#x} vs {end_off:#x}")]
    StartAfterEnd {
        start: String,
        end: String,
        start_off: u64,
        end_off: u64,
    },
    #[error("No program header at index {idx}")]
    NoSuchSegment { idx: usize },
    #[error("Destination {path} exists")]
    DestinationExists { path: String },
    #[error("No binary loaded")]
    NoBinaryLoaded,
    #[error("Loader already contains a binary")]
    BinaryAlreadyLoaded,
    #[error("Binary failed verification")]
    VerifyFailed,
    #[error("Unknown loader: {name}")]
    UnknownLoader { name: String },
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },
    #[error("Wrong number of arguments for {command}: expected {expected}, got {found}")]
    CommandArity {
        command: String,
        expected: usize,
        found: usize,
    },
    #[error("Unknown value for '{arg}': {value}")]
    BadArgument { arg: String, value: String },
    #[error("Cannot find file {path}")]
    MissingFile { path: String },
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io { kind: value.kind() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
