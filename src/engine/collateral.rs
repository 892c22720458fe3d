//! Collateral flows: deposits, withdrawals, internal transfers and auto-exchange.

use super::core::Engine;
use super::results::EngineError;
use crate::account::{AccountError, Permission};
use crate::collateral::{CollateralError, PricingContext};
use crate::collateral_pool::CollateralPool;
use crate::events::{AutoExchangeEvent, CollateralEvent, EventPayload, WithdrawalRejectedEvent};
use crate::market_manager::MarketManager;
use crate::oracle::PriceOracle;
use crate::types::{div_wad, mul_wad, AccountId, Address};
use rust_decimal::Decimal;

fn ensure_positive(amount: Decimal) -> Result<(), EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(amount));
    }
    Ok(())
}

/// Quote units paid per unit of `collateral`, priced through the common ancestor and
/// improved by the collateral's auto-exchange discount.
pub(super) fn auto_exchange_price(
    pool: &CollateralPool,
    collateral: Address,
    quote_token: Address,
    pricing: &PricingContext<'_>,
) -> Result<Decimal, CollateralError> {
    let common = pool.bubbles.get_common_token(collateral, quote_token)?;
    let collateral_info = pool.bubbles.get_exchange_info(collateral, common, pricing)?;
    let quote_info = pool.bubbles.get_exchange_info(quote_token, common, pricing)?;
    if quote_info.price.is_zero() {
        return Err(CollateralError::CannotExchangeTokens {
            from: collateral,
            to: quote_token,
        });
    }
    Ok(div_wad(collateral_info.discounted_price(), quote_info.price))
}

impl<M, O> Engine<M, O>
where
    M: MarketManager + Clone,
    O: PriceOracle,
{
    /// Books a signed change on the account and on its root pool.
    pub(super) fn update_net_collateral_deposits(
        &mut self,
        account_id: AccountId,
        token: Address,
        delta: Decimal,
    ) -> Result<(), EngineError> {
        let pool_id = self.account_collateral_pool_id(account_id)?;
        self.account_mut(account_id)?
            .update_net_collateral_deposits(token, delta);
        self.state.pools.root_mut(pool_id)?.update_balance(token, delta);
        Ok(())
    }

    pub(super) fn transfer_collateral(
        &mut self,
        from: AccountId,
        to: AccountId,
        token: Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.update_net_collateral_deposits(from, token, -amount)?;
        self.update_net_collateral_deposits(to, token, amount)
    }

    pub fn deposit(&mut self, account_id: AccountId, token: Address, amount: Decimal) -> Result<(), EngineError> {
        self.atomically(|engine| {
            ensure_positive(amount)?;
            engine.account_pool(account_id)?.check_deposit(token, amount)?;
            engine.update_net_collateral_deposits(account_id, token, amount)?;

            let new_net_deposits = engine.account(account_id)?.net_deposits(token);
            engine.emit_event(EventPayload::Deposit(CollateralEvent {
                account_id,
                token,
                amount,
                new_net_deposits,
            }));
            Ok(())
        })
    }

    /// `min(real balance, USD initial delta in token units)`, floored at zero.
    pub fn get_withdrawable_balance(&self, account_id: AccountId, token: Address) -> Result<Decimal, EngineError> {
        let real_balance = self
            .get_margin_info_by_collateral_type(account_id, token)?
            .real_balance;
        let initial_delta = self.get_usd_margin_info(account_id)?.initial_delta;

        let pool = self.account_pool(account_id)?;
        let exchange = pool
            .bubbles
            .get_exchange_info(token, Address::USD, &self.pricing())?;
        let limit = exchange.convert_down_raw(initial_delta);

        Ok(real_balance.min(limit).max(Decimal::ZERO))
    }

    // blocked when the withdrawal would break IM
    pub fn withdraw(
        &mut self,
        caller: Address,
        account_id: AccountId,
        token: Address,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let result = self.atomically(|engine| {
            engine.ensure_permission(account_id, caller, Permission::Withdraw)?;
            ensure_positive(amount)?;

            let withdrawable = engine.get_withdrawable_balance(account_id, token)?;
            if amount > withdrawable {
                return Err(EngineError::WithdrawalExceedsLimit {
                    account_id,
                    token,
                    requested: amount,
                    withdrawable,
                });
            }

            engine.update_net_collateral_deposits(account_id, token, -amount)?;
            engine.ensure_im_satisfied(account_id)?;

            let new_net_deposits = engine.account(account_id)?.net_deposits(token);
            engine.emit_event(EventPayload::Withdrawal(CollateralEvent {
                account_id,
                token,
                amount,
                new_net_deposits,
            }));
            Ok(())
        });

        if let Err(e @ (EngineError::WithdrawalExceedsLimit { .. } | EngineError::AccountBelowIM { .. })) = &result {
            // Emit rejection event for audit
            self.emit_event(EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                account_id,
                token,
                amount,
                reason: e.to_string(),
            }));
        }
        result
    }

    /// Value of the account's other collaterals in `quote_token`, at auto-exchange prices.
    pub(super) fn pending_auto_exchange_funds(
        &self,
        account_id: AccountId,
        quote_token: Address,
    ) -> Result<Decimal, EngineError> {
        let account = self.account(account_id)?;
        let pool = self.account_pool(account_id)?;
        let pricing = self.pricing();

        let mut total = Decimal::ZERO;
        for collateral in account.active_collaterals() {
            let amount = account.net_deposits(collateral);
            if collateral == quote_token || amount <= Decimal::ZERO {
                continue;
            }
            let price = auto_exchange_price(pool, collateral, quote_token, &pricing)?;
            total += mul_wad(amount, price);
        }
        Ok(total)
    }

    /// Pays `quote_amount` of the account's `quote_token` debt from the auto-exchanger and
    /// hands over `collateral` at the discounted price. Returns the collateral paid out.
    pub fn auto_exchange(
        &mut self,
        caller: Address,
        account_id: AccountId,
        auto_exchanger_id: AccountId,
        collateral: Address,
        quote_token: Address,
        quote_amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.atomically(|engine| {
            engine.ensure_permission(auto_exchanger_id, caller, Permission::Withdraw)?;
            ensure_positive(quote_amount)?;
            engine.ensure_same_pool(auto_exchanger_id, account_id)?;

            let real_balance = engine
                .get_margin_info_by_collateral_type(account_id, quote_token)?
                .real_balance;
            if real_balance >= Decimal::ZERO {
                return Err(EngineError::AutoExchangeNotRequired {
                    account_id,
                    token: quote_token,
                    real_balance,
                });
            }
            if quote_amount > -real_balance {
                return Err(EngineError::AutoExchangeExceedsDebt {
                    account_id,
                    token: quote_token,
                    amount: quote_amount,
                    debt: -real_balance,
                });
            }

            let price = {
                let pool = engine.account_pool(account_id)?;
                auto_exchange_price(pool, collateral, quote_token, &engine.pricing())?
            };
            if price.is_zero() {
                return Err(CollateralError::CannotExchangeTokens {
                    from: collateral,
                    to: quote_token,
                }
                .into());
            }
            let collateral_amount = div_wad(quote_amount, price);

            let available = engine.account(account_id)?.net_deposits(collateral);
            if collateral_amount > available {
                return Err(AccountError::InsufficientCollateral {
                    account_id,
                    token: collateral,
                    requested: collateral_amount,
                    available,
                }
                .into());
            }

            engine.transfer_collateral(auto_exchanger_id, account_id, quote_token, quote_amount)?;
            engine.transfer_collateral(account_id, auto_exchanger_id, collateral, collateral_amount)?;
            engine.ensure_im_satisfied(auto_exchanger_id)?;

            engine.emit_event(EventPayload::AutoExchange(AutoExchangeEvent {
                account_id,
                auto_exchanger_id,
                quote_token,
                collateral,
                quote_amount,
                collateral_amount,
            }));
            Ok(collateral_amount)
        })
    }
}
