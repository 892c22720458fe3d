//! Margin queries.
//!
//! Requirements are computed per collateral type from the live exposures of every market
//! the account is active in under that quote token, then rolled up the pool's bubble tree.

use super::core::Engine;
use super::results::EngineError;
use crate::account::Account;
use crate::collateral::PricingContext;
use crate::collateral_pool::CollateralPool;
use crate::margin::{worst_case_requirement, MarginInfo, RequirementDeltas, RequirementsAndLoss};
use crate::market_manager::{MarketManager, PnlComponents};
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Address};
use rust_decimal::Decimal;

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    /// Requirements, pnl and unrealized loss of one account in one quote token.
    pub(super) fn requirements_and_pnl(
        &self,
        account: &Account,
        collateral_type: Address,
    ) -> Result<(RequirementsAndLoss, PnlComponents), EngineError> {
        let mut requirements = RequirementsAndLoss::default();
        let mut pnl = PnlComponents::default();

        for market_id in account.active_markets(collateral_type) {
            let market = self.market(market_id)?;
            let manager = self.market_manager(market.market_manager)?;
            let exposures = manager.get_account_taker_and_maker_exposures(market_id, account.id)?;

            for exposure in &exposures.exposures {
                requirements.add(worst_case_requirement(exposure, market.risk_parameter));
            }
            pnl.realized_pnl += exposures.pnl.realized_pnl;
            pnl.accrued_interest += exposures.pnl.accrued_interest;
            pnl.unrealized_pnl += exposures.pnl.unrealized_pnl;
        }
        Ok((requirements, pnl))
    }

    fn collateral_type_info(
        &self,
        account: &Account,
        pool: &CollateralPool,
        collateral_type: Address,
    ) -> Result<MarginInfo, EngineError> {
        let (requirements, pnl) = self.requirements_and_pnl(account, collateral_type)?;
        Ok(MarginInfo::compute(
            collateral_type,
            account.net_deposits(collateral_type),
            pnl,
            requirements,
            &pool.config.risk,
        ))
    }

    pub fn get_margin_info_by_collateral_type(
        &self,
        account_id: AccountId,
        collateral_type: Address,
    ) -> Result<MarginInfo, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.account_pool(account_id)?;
        self.collateral_type_info(account, pool, collateral_type)
    }

    /// Info of `token` with every descendant folded in.
    fn bubble_info(
        &self,
        account: &Account,
        pool: &CollateralPool,
        token: Address,
        pricing: &PricingContext<'_>,
    ) -> Result<MarginInfo, EngineError> {
        let mut info = self.collateral_type_info(account, pool, token)?;

        for child in pool.bubbles.children(token) {
            let child_info = self.bubble_info(account, pool, child, pricing)?;
            // untouched subtrees need no price
            if child_info == MarginInfo::empty(child) {
                continue;
            }
            let (_, exchange) = pool.bubbles.parent_exchange_info(child, pricing)?;
            info.absorb(&child_info, &exchange);
        }
        Ok(info)
    }

    pub fn get_margin_info_by_bubble(
        &self,
        account_id: AccountId,
        base_token: Address,
    ) -> Result<MarginInfo, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.account_pool(account_id)?;
        pool.bubbles.config(base_token)?;
        let pricing = self.pricing();
        self.bubble_info(account, pool, base_token, &pricing)
    }

    /// Whole-account info in USD, the view every tier gate reads.
    pub fn get_usd_margin_info(&self, account_id: AccountId) -> Result<MarginInfo, EngineError> {
        self.get_margin_info_by_bubble(account_id, Address::USD)
    }

    pub fn get_requirement_deltas_by_collateral_type(
        &self,
        account_id: AccountId,
        collateral_type: Address,
    ) -> Result<RequirementDeltas, EngineError> {
        Ok(self
            .get_margin_info_by_collateral_type(account_id, collateral_type)?
            .requirement_deltas())
    }

    pub fn get_requirement_deltas_by_bubble(
        &self,
        account_id: AccountId,
        base_token: Address,
    ) -> Result<RequirementDeltas, EngineError> {
        Ok(self
            .get_margin_info_by_bubble(account_id, base_token)?
            .requirement_deltas())
    }

    pub fn is_im_satisfied(&self, account_id: AccountId) -> Result<bool, EngineError> {
        Ok(self.get_usd_margin_info(account_id)?.is_im_satisfied())
    }

    pub(super) fn ensure_im_satisfied(&self, account_id: AccountId) -> Result<(), EngineError> {
        let info = self.get_usd_margin_info(account_id)?;
        if !info.is_im_satisfied() {
            return Err(EngineError::AccountBelowIM {
                account_id,
                initial_delta: info.initial_delta,
            });
        }
        Ok(())
    }

    /// Raw LMR of an account in one quote token.
    pub(super) fn raw_lmr(&self, account_id: AccountId, quote_token: Address) -> Result<Decimal, EngineError> {
        let account = self.account(account_id)?;
        let (requirements, _) = self.requirements_and_pnl(account, quote_token)?;
        Ok(requirements.raw_liquidation_margin_requirement())
    }

    /// USD initial delta, the free collateral the backstop LP is judged by.
    pub fn free_collateral_in_usd(&self, account_id: AccountId) -> Result<Decimal, EngineError> {
        Ok(self.get_usd_margin_info(account_id)?.initial_delta)
    }
}
