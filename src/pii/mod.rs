// SPDX-License-Identifier: MIT OR Apache-2.0

//! C6: per-request PII detection, masking, and placeholder resolution.
//!
//! Masking happens on tool *output*, never on input: a handler calls
//! [`PiiContext::mask_and_track`] on text about to leave the trust boundary
//! (e.g. toward an LLM provider), and later action tools that need the raw
//! value call [`PiiContext::resolve`] with the placeholder they were given.

use std::collections::HashMap;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod patterns;

bitflags! {
    /// Which [`PiiType`]s a [`MaskingMode`] covers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PiiTypeSet: u8 {
        const SSN = 1 << 0;
        const CREDIT_CARD = 1 << 1;
        const BANK_ACCOUNT = 1 << 2;
        const EMAIL = 1 << 3;
        const PHONE = 1 << 4;
        const ADDRESS = 1 << 5;
        const DOB = 1 << 6;
        const IP_ADDRESS = 1 << 7;

        const FINANCIAL = Self::SSN.bits() | Self::CREDIT_CARD.bits() | Self::BANK_ACCOUNT.bits();
        const ALL = u8::MAX;
    }
}

impl PiiTypeSet {
    const fn bit_for(pii_type: PiiType) -> Self {
        match pii_type {
            PiiType::Ssn => Self::SSN,
            PiiType::CreditCard => Self::CREDIT_CARD,
            PiiType::BankAccount => Self::BANK_ACCOUNT,
            PiiType::Email => Self::EMAIL,
            PiiType::Phone => Self::PHONE,
            PiiType::Address => Self::ADDRESS,
            PiiType::Dob => Self::DOB,
            PiiType::IpAddress => Self::IP_ADDRESS,
        }
    }
}

/// Types of PII detected and masked.
///
/// Discriminants fix the array index [`patterns::patterns_for`] looks up,
/// and also the detection order: most specific patterns (SSN, card, bank
/// account) run before more general ones (email, phone, address) so a
/// number embedded in a larger financial pattern isn't masked twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(usize)]
pub enum PiiType {
    /// US SSN / Canadian SIN.
    Ssn = 0,
    /// Credit or debit card number.
    CreditCard = 1,
    /// Bank account or routing number.
    BankAccount = 2,
    /// Email address.
    Email = 3,
    /// Phone number.
    Phone = 4,
    /// Street address.
    Address = 5,
    /// Date of birth.
    Dob = 6,
    /// IPv4 address.
    IpAddress = 7,
}

impl PiiType {
    const ALL: [Self; 8] = [
        Self::Ssn,
        Self::CreditCard,
        Self::BankAccount,
        Self::Email,
        Self::Phone,
        Self::Address,
        Self::Dob,
        Self::IpAddress,
    ];

    /// Stable label used in placeholders (`[EMAIL_1]`) and audit entries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ssn => "SSN",
            Self::CreditCard => "CARD",
            Self::BankAccount => "ACCOUNT",
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Address => "ADDRESS",
            Self::Dob => "DOB",
            Self::IpAddress => "IP",
        }
    }
}

/// Which PII types a given mode masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskingMode {
    /// Mask everything: emails, phones, SSNs, cards, accounts, addresses,
    /// DOBs, IPs. Used for tools whose output could reach an LLM provider.
    Full,
    /// Only mask financial/identity PII (SSN, card, bank account); contact
    /// info (email, phone, address) stays visible.
    FinancialOnly,
    /// No masking. Used by write/action tools operating on raw data
    /// internally, never on data headed toward a third party.
    None,
}

impl MaskingMode {
    const fn type_set(self) -> PiiTypeSet {
        match self {
            Self::None => PiiTypeSet::empty(),
            Self::Full => PiiTypeSet::ALL,
            Self::FinancialOnly => PiiTypeSet::FINANCIAL,
        }
    }

    fn masks(self, pii_type: PiiType) -> bool {
        self.type_set().contains(PiiTypeSet::bit_for(pii_type))
    }
}

/// Record of a single masked occurrence.
#[derive(Debug, Clone)]
pub struct MaskedItem {
    /// The detected type.
    pub pii_type: PiiType,
    /// The placeholder substituted into the output text.
    pub placeholder: String,
    /// The original value. Held only in memory for the lifetime of the
    /// request; never persisted.
    pub original_value: String,
    /// When this item was masked.
    pub masked_at: DateTime<Utc>,
}

/// Result of one [`PiiContext::mask_and_track`] call.
#[derive(Debug, Clone)]
pub struct PiiMaskingResult {
    /// Text with every masked occurrence replaced by its placeholder.
    pub masked_text: String,
    /// Items masked by this call, in detection order.
    pub items_masked: Vec<MaskedItem>,
}

impl PiiMaskingResult {
    /// Number of items masked by this call.
    #[must_use]
    pub fn mask_count(&self) -> usize {
        self.items_masked.len()
    }
}

/// A non-sensitive audit log entry: type and placeholder only, never the
/// original value (spec §3 "PII Audit Entry" invariant).
#[derive(Debug, Clone, Serialize)]
pub struct PiiAuditEntry {
    /// PII type label.
    pub pii_type: &'static str,
    /// The placeholder that was substituted.
    pub placeholder: String,
    /// When it was masked.
    pub masked_at: DateTime<Utc>,
}

/// Per-request masking context. Installed at the start of a request by
/// middleware, flushed to the audit log at the end.
#[derive(Debug, Default)]
pub struct PiiContext {
    mappings: HashMap<String, MaskedItem>,
    counters: HashMap<&'static str, u32>,
    total_masked: u32,
}

impl PiiContext {
    /// Start a fresh, empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_placeholder(&mut self, pii_type: PiiType) -> String {
        let counter = self.counters.entry(pii_type.label()).or_insert(0);
        *counter += 1;
        format!("[{}_{}]", pii_type.label(), counter)
    }

    /// Mask PII in `text` per `mode`, tracking every substitution for later
    /// resolution and audit. Idempotent: a placeholder already present in
    /// the text (`[EMAIL_1]`) is never re-masked, matching the skip-if-
    /// already-bracketed rule.
    pub fn mask_and_track(&mut self, text: &str, mode: MaskingMode) -> PiiMaskingResult {
        if text.is_empty() || mode == MaskingMode::None {
            return PiiMaskingResult {
                masked_text: text.to_owned(),
                items_masked: Vec::new(),
            };
        }

        let mut items_masked = Vec::new();
        let mut result_text = text.to_owned();

        for pii_type in PiiType::ALL {
            if !mode.masks(pii_type) {
                continue;
            }

            let pattern_set = patterns::patterns_for(pii_type);
            for regex in &pattern_set.regexes {
                let mut search_from = 0;
                loop {
                    let Some(m) = regex.find_at(&result_text, search_from) else {
                        break;
                    };
                    let found = m.as_str().to_owned();
                    if found.starts_with('[') && found.ends_with(']') {
                        search_from = m.end();
                        continue;
                    }

                    let placeholder = self.next_placeholder(pii_type);
                    let item = MaskedItem {
                        pii_type,
                        placeholder: placeholder.clone(),
                        original_value: found.clone(),
                        masked_at: Utc::now(),
                    };
                    self.mappings.insert(placeholder.clone(), item.clone());
                    self.total_masked += 1;
                    items_masked.push(item);

                    result_text = result_text.replacen(&found, &placeholder, 1);
                    search_from = 0;
                }
            }
        }

        PiiMaskingResult { masked_text: result_text, items_masked }
    }

    /// Resolve a placeholder back to its original value. Use sparingly —
    /// only action tools that genuinely need the raw value should call this.
    /// The resolution itself is an audit-worthy event (spec §4.6): every
    /// call, hit or miss, is logged with the placeholder but never the
    /// resolved value itself.
    #[must_use]
    pub fn resolve(&self, placeholder: &str) -> Option<&str> {
        let resolved = self.mappings.get(placeholder).map(|item| item.original_value.as_str());
        tracing::debug!(placeholder, hit = resolved.is_some(), "pii placeholder resolved");
        resolved
    }

    /// Per-type and total masking counts for this request.
    #[must_use]
    pub fn stats(&self) -> HashMap<&'static str, u32> {
        let mut stats = self.counters.clone();
        stats.insert("total", self.total_masked);
        stats
    }

    /// Every masked item in this context, as a counts-only audit record.
    #[must_use]
    pub fn audit_log(&self) -> Vec<PiiAuditEntry> {
        self.mappings
            .values()
            .map(|item| PiiAuditEntry {
                pii_type: item.pii_type.label(),
                placeholder: item.placeholder.clone(),
                masked_at: item.masked_at,
            })
            .collect()
    }

    /// Total items masked so far in this context.
    #[must_use]
    pub const fn total_masked(&self) -> u32 {
        self.total_masked
    }
}

tokio::task_local! {
    /// Per-request PII context, installed by middleware at request start
    /// and scoped to the async task processing that request — the Rust
    /// analogue of a Python `ContextVar`.
    static CURRENT: std::cell::RefCell<PiiContext>;
}

/// Run `f` with a fresh [`PiiContext`] installed, returning `f`'s result
/// alongside the context so the caller can flush its audit log.
pub async fn with_fresh_context<F, Fut, T>(f: F) -> (T, PiiContext)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    CURRENT
        .scope(std::cell::RefCell::new(PiiContext::new()), async move {
            let result = f().await;
            let context = CURRENT.with(std::cell::RefCell::take);
            (result, context)
        })
        .await
}

/// Mask text using the context installed for the current request. Panics if
/// called outside [`with_fresh_context`] — every handler below the request
/// boundary must run inside one.
pub fn mask_and_track(text: &str, mode: MaskingMode) -> PiiMaskingResult {
    CURRENT.with(|ctx| ctx.borrow_mut().mask_and_track(text, mode))
}

/// Resolve a placeholder using the context installed for the current request.
#[must_use]
pub fn resolve(placeholder: &str) -> Option<String> {
    CURRENT.with(|ctx| ctx.borrow().resolve(placeholder).map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email_in_full_mode() {
        let mut ctx = PiiContext::new();
        let result = ctx.mask_and_track("contact me at alice@example.com please", MaskingMode::Full);
        assert_eq!(result.mask_count(), 1);
        assert!(result.masked_text.contains("[EMAIL_1]"));
        assert!(!result.masked_text.contains("alice@example.com"));
    }

    #[test]
    fn financial_only_mode_leaves_email_visible() {
        let mut ctx = PiiContext::new();
        let result = ctx.mask_and_track("email alice@example.com, ssn 123-45-6789", MaskingMode::FinancialOnly);
        assert!(result.masked_text.contains("alice@example.com"));
        assert!(result.masked_text.contains("[SSN_1]"));
    }

    #[test]
    fn none_mode_masks_nothing() {
        let mut ctx = PiiContext::new();
        let result = ctx.mask_and_track("ssn 123-45-6789", MaskingMode::None);
        assert_eq!(result.mask_count(), 0);
        assert_eq!(result.masked_text, "ssn 123-45-6789");
    }

    #[test]
    fn resolve_returns_original_value() {
        let mut ctx = PiiContext::new();
        let result = ctx.mask_and_track("alice@example.com", MaskingMode::Full);
        let placeholder = &result.items_masked[0].placeholder;
        assert_eq!(ctx.resolve(placeholder), Some("alice@example.com"));
    }

    #[test]
    fn resolve_unknown_placeholder_returns_none() {
        let ctx = PiiContext::new();
        assert_eq!(ctx.resolve("[EMAIL_99]"), None);
    }

    #[test]
    fn audit_log_never_contains_original_value() {
        let mut ctx = PiiContext::new();
        ctx.mask_and_track("alice@example.com", MaskingMode::Full);
        let audit = ctx.audit_log();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].pii_type, "EMAIL");
    }

    #[test]
    fn stats_track_per_type_and_total_counts() {
        let mut ctx = PiiContext::new();
        ctx.mask_and_track("alice@example.com and bob@example.com", MaskingMode::Full);
        let stats = ctx.stats();
        assert_eq!(stats["EMAIL"], 2);
        assert_eq!(stats["total"], 2);
    }

    #[tokio::test]
    async fn fresh_context_starts_empty_each_request() {
        let (masked, ctx) = with_fresh_context(|| async {
            mask_and_track("alice@example.com", MaskingMode::Full).masked_text
        })
        .await;
        assert!(masked.contains("[EMAIL_1]"));
        assert_eq!(ctx.total_masked(), 1);
    }
}
