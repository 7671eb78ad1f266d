use std::sync::Arc;

use crate::service::FundsService;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub funds: Arc<FundsService>,
    /// Minor-unit decimals used to parse and format amounts
    pub decimals: u32,
}

impl AppState {
    pub fn new(funds: Arc<FundsService>) -> Self {
        let decimals = funds.config().currency_decimals;
        Self { funds, decimals }
    }
}
