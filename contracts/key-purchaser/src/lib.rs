//! KeyGrant - Key Purchaser (Soroban)
//! Delegated purchase and renewal of time-bounded membership keys on Stellar.
//!
//! A key holder grants this contract a token allowance once; after that,
//! anyone (a relay, a bot, the membership site itself) may trigger a purchase
//! or renewal on their behalf. The contract enforces the terms the holder
//! agreed to at deployment: a price ceiling, a renewal window, a minimum
//! spacing between renewals, and an optional single-use restriction.

#![no_std]
use soroban_sdk::{
    contract, contractimpl, contracttype, symbol_short, token, Address, Bytes, Env, IntoVal,
    String, Symbol, Val, Vec,
};

/// Terms fixed at initialization. There is no entrypoint that rewrites them,
/// so the price ceiling a holder approved against can never be raised.
#[contracttype]
#[derive(Clone)]
pub struct PurchaseTerms {
    /// Highest live price (token base units) a purchase may settle at.
    pub max_price: i128,
    /// Seconds before a valid key's expiration during which renewal opens.
    /// Zero means a valid key can never be renewed early.
    pub renew_window: u64,
    /// Minimum seconds between two successful purchases for the same user,
    /// counted even when the key was invalidated in between.
    pub renew_min_frequency: u64,
    /// When false, one successful purchase per user, ever.
    pub recurring: bool,
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Admin,
    PendingAdmin,
    Lock,
    Terms,
    Name,
    Disabled,
    Stopped,
    LastPurchase(Address),
    PurchaseCount(Address),
}

const INSTANCE_LIFETIME_THRESHOLD: u32 = 17_280;
const INSTANCE_BUMP_AMOUNT: u32 = 86_400;
const PERSISTENT_LIFETIME_THRESHOLD: u32 = 120_960;
const PERSISTENT_BUMP_AMOUNT: u32 = 1_051_200;

#[contract]
pub struct KeyPurchaserContract;

#[contractimpl]
impl KeyPurchaserContract {
    /// Bind this purchaser to one lock contract and fix the purchase terms.
    /// Callable exactly once.
    pub fn initialize(
        env: Env,
        lock: Address,
        max_price: i128,
        renew_window: u64,
        renew_min_frequency: u64,
        recurring: bool,
        admin: Address,
    ) {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("already initialized");
        }
        admin.require_auth();

        if max_price <= 0 {
            panic!("invalid max price");
        }

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Lock, &lock);
        env.storage().instance().set(
            &DataKey::Terms,
            &PurchaseTerms {
                max_price,
                renew_window,
                renew_min_frequency,
                recurring,
            },
        );
    }

    /// Purchase or renew a key for `user`, paid from `user`'s allowance to
    /// this contract. Callable by anyone: the stored terms, not the caller's
    /// identity, decide whether the attempt may proceed. `referrer` and
    /// `data` are passed through to the lock uninterpreted.
    ///
    /// The whole sequence is one Soroban invocation: any failed check or
    /// rejected downstream call reverts every state write and token move,
    /// and the host rejects reentry into this contract mid-call.
    pub fn purchase_for(env: Env, user: Address, referrer: Option<Address>, data: Bytes) {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);

        if Self::is_stopped(env.clone()) {
            panic!("stopped");
        }
        // `disabled` is deliberately not checked here: disabling hides the
        // offering from listings without cutting off existing subscribers.

        let terms: PurchaseTerms = env
            .storage()
            .instance()
            .get(&DataKey::Terms)
            .expect("not initialized");

        let count_key = DataKey::PurchaseCount(user.clone());
        let purchases: u32 = env.storage().persistent().get(&count_key).unwrap_or(0);
        if !terms.recurring && purchases > 0 {
            panic!("single use only");
        }

        let lock: Address = env.storage().instance().get(&DataKey::Lock).unwrap();
        let now = env.ledger().timestamp();

        let has_valid: bool = env.invoke_contract(
            &lock,
            &Symbol::new(&env, "has_valid_key"),
            Vec::from_array(&env, [(&user).into_val(&env)]),
        );
        if has_valid {
            let expiration: u64 = env.invoke_contract(
                &lock,
                &Symbol::new(&env, "key_expiration"),
                Vec::from_array(&env, [(&user).into_val(&env)]),
            );
            if expiration.saturating_sub(now) > terms.renew_window {
                panic!("outside renew window");
            }
        }

        // Rate limit applies whether or not the key is still valid, so an
        // externally expired or revoked key cannot be used to renew faster.
        let last_key = DataKey::LastPurchase(user.clone());
        if let Some(last) = env.storage().persistent().get::<DataKey, u64>(&last_key) {
            if now - last < terms.renew_min_frequency {
                panic!("before min frequency");
            }
        }

        // Price and token are read live from the lock on every attempt,
        // never cached. The user pays the live price, never the ceiling.
        let price: i128 = env.invoke_contract(
            &lock,
            &Symbol::new(&env, "key_price"),
            Vec::<Val>::new(&env),
        );
        if price > terms.max_price {
            panic!("price too high");
        }

        let token_addr: Address = env.invoke_contract(
            &lock,
            &Symbol::new(&env, "payment_token"),
            Vec::<Val>::new(&env),
        );
        token::Client::new(&env, &token_addr).transfer_from(
            &env.current_contract_address(),
            &user,
            &lock,
            &price,
        );

        env.invoke_contract::<()>(
            &lock,
            &Symbol::new(&env, "purchase"),
            Vec::from_array(
                &env,
                [
                    (&user).into_val(&env),
                    price.into_val(&env),
                    referrer.into_val(&env),
                    data.into_val(&env),
                ],
            ),
        );

        env.storage().persistent().set(&last_key, &now);
        env.storage().persistent().extend_ttl(
            &last_key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );
        env.storage().persistent().set(&count_key, &(purchases + 1));
        env.storage().persistent().extend_ttl(
            &count_key,
            PERSISTENT_LIFETIME_THRESHOLD,
            PERSISTENT_BUMP_AMOUNT,
        );

        env.events().publish(
            (symbol_short!("purchase"), symbol_short!("key")),
            (user, price),
        );
    }

    /// Permanently stop all purchases through this contract. Admin only.
    /// Idempotent, and there is no entrypoint that writes `false` back.
    pub fn stop(env: Env, admin: Address) {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        keygrant_common_admin::require_admin(&env, &DataKey::Admin, admin.clone());

        env.storage().instance().set(&DataKey::Stopped, &true);
        env.events()
            .publish((symbol_short!("guard"), symbol_short!("stopped")), admin);
    }

    /// Set the display name and the reversible `disabled` flag. Admin only,
    /// callable any number of times. `disabled` only affects `is_active`;
    /// it never blocks purchases.
    pub fn config(env: Env, admin: Address, name: String, disabled: bool) {
        env.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
        keygrant_common_admin::require_admin(&env, &DataKey::Admin, admin);

        env.storage().instance().set(&DataKey::Name, &name);
        env.storage().instance().set(&DataKey::Disabled, &disabled);
        env.events().publish(
            (symbol_short!("guard"), symbol_short!("config")),
            (name, disabled),
        );
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn name(env: Env) -> String {
        env.storage()
            .instance()
            .get(&DataKey::Name)
            .unwrap_or_else(|| String::from_str(&env, ""))
    }

    /// Status flag for discovery/listing only; a false value does not by
    /// itself block purchases (stopping does, disabling does not).
    pub fn is_active(env: Env) -> bool {
        let disabled: bool = env
            .storage()
            .instance()
            .get(&DataKey::Disabled)
            .unwrap_or(false);
        !disabled && !Self::is_stopped(env)
    }

    pub fn is_stopped(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::Stopped)
            .unwrap_or(false)
    }

    pub fn get_admin(env: Env) -> Address {
        env.storage()
            .instance()
            .get(&DataKey::Admin)
            .expect("not initialized")
    }

    pub fn get_lock(env: Env) -> Address {
        env.storage()
            .instance()
            .get(&DataKey::Lock)
            .expect("not initialized")
    }

    pub fn get_terms(env: Env) -> PurchaseTerms {
        env.storage()
            .instance()
            .get(&DataKey::Terms)
            .expect("not initialized")
    }

    /// Timestamp of the user's last successful purchase through this
    /// contract, or `None` if they have never purchased here.
    pub fn last_purchase_at(env: Env, user: Address) -> Option<u64> {
        env.storage()
            .persistent()
            .get(&DataKey::LastPurchase(user))
    }

    pub fn has_purchased(env: Env, user: Address) -> bool {
        env.storage()
            .persistent()
            .get::<DataKey, u32>(&DataKey::PurchaseCount(user))
            .unwrap_or(0)
            > 0
    }

    // ── Admin rotation ───────────────────────────────────────────────────

    pub fn propose_admin(env: Env, current_admin: Address, new_admin: Address) {
        keygrant_common_admin::propose_admin(
            &env,
            &DataKey::Admin,
            &DataKey::PendingAdmin,
            current_admin,
            new_admin,
        );
    }

    pub fn accept_admin(env: Env, new_admin: Address) {
        keygrant_common_admin::accept_admin(
            &env,
            &DataKey::Admin,
            &DataKey::PendingAdmin,
            new_admin,
        );
    }
}
