mod args;
mod driver;
mod progress;
mod time_range;
mod tsv;
mod write;

pub use args::*;
pub use driver::{
    configure, AlignArgs, Command, CommonArgs, DeconvoluteArgs, MZQuanter, MZQuanterError,
    PairsArgs, DEFAULT_CONFIG_FILE, ENV_PREFIX,
};
pub use progress::ProgressRecord;
pub use time_range::{TimeRange, TimeRangeParseError};
pub use tsv::{
    open_input, open_output, read_feature_set, TsvError, TsvFeatureReader, TsvFeatureWriter,
};
pub use write::{write_peptide_array, ArrayMessage, ChannelSink, PeptideArrayWriter, MULTIPLE_TAG};
