pub mod account;
pub mod config;
pub mod cursor;
pub mod error;
pub mod normalize;
pub mod record;
pub mod types;

pub use account::{acct_domain, acct_to_string};
pub use config::{CrawlSettings, Credentials};
pub use cursor::{date_to_snowflake, snowflake_to_date, Cursor};
pub use error::{ConfigError, NormalizeError};
pub use normalize::{
    format_timestamp, html_to_text, normalize_account, normalize_batch, normalize_instance,
    normalize_status, NormalizedBatch,
};
pub use record::{
    Account, Instance, Record, ACCOUNT_COLUMNS, INSTANCE_COLUMNS, RECORD_COLUMNS,
    RECORD_COLUMNS_VERSION,
};
pub use types::{Predicate, RawStatus, Timelines};
