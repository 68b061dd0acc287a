// ============================================================================
// Order Book Module
// Price levels, stop watch list and the per-symbol book
// ============================================================================

pub mod history;
pub mod order_book;
pub mod price_level;
pub mod stop_book;

pub use history::{OrderHistory, DEFAULT_HISTORY_CAPACITY};
pub use order_book::{Fill, FillEstimate, MatchResult, OrderBook, OrderBookSnapshot};
pub use price_level::{BookSide, PriceLevel};
pub use stop_book::StopBook;
