//! Typed record assembly
//!
//! Every field is checked even after the first failure so the audit trail
//! names all problems of a rejected record.

use carddemo_common::RecordType;

use super::fields;
use super::{FieldViolation, ValidationContext, ViolationKind};
use crate::ingest::decoder::RawRecord;
use crate::ingest::models::{
    AccountRecord, CardRecord, CardXrefRecord, DomainRecord, TransactionCategoryRecord,
    TransactionRecord, TransactionTypeRecord,
};

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn check<T>(&mut self, result: Result<T, FieldViolation>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(violation) => {
                self.0.push(violation);
                None
            },
        }
    }

    fn push(&mut self, violation: FieldViolation) {
        self.0.push(violation);
    }

    fn finish(self) -> Result<(), Vec<FieldViolation>> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}

/// Build the typed record for `raw`, or every violation found
pub fn validate_record(
    raw: &RawRecord,
    ctx: &ValidationContext,
) -> Result<DomainRecord, Vec<FieldViolation>> {
    match raw.record_type {
        RecordType::TransactionType => transaction_type(raw).map(DomainRecord::TransactionType),
        RecordType::TransactionCategory => {
            transaction_category(raw).map(DomainRecord::TransactionCategory)
        },
        RecordType::Account => account(raw, ctx).map(DomainRecord::Account),
        RecordType::Card => card(raw, ctx).map(DomainRecord::Card),
        RecordType::CardXref => card_xref(raw, ctx).map(DomainRecord::CardXref),
        RecordType::Transaction => transaction(raw, ctx).map(DomainRecord::Transaction),
    }
}

fn transaction_type(raw: &RawRecord) -> Result<TransactionTypeRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();
    let type_code = v.check(fields::validate_transaction_type(raw.field("type_code")));
    let description =
        v.check(fields::validate_required_string("description", raw.field("description"), 50));

    let (Some(type_code), Some(description)) = (type_code, description) else {
        return Err(v.0);
    };
    Ok(TransactionTypeRecord {
        type_code,
        description,
    })
}

fn transaction_category(
    raw: &RawRecord,
) -> Result<TransactionCategoryRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();
    let type_code = v.check(fields::validate_transaction_type(raw.field("type_code")));
    let category_code =
        v.check(fields::validate_transaction_category(raw.field("category_code")));
    let description =
        v.check(fields::validate_required_string("description", raw.field("description"), 50));

    let (Some(type_code), Some(category_code), Some(description)) =
        (type_code, category_code, description)
    else {
        return Err(v.0);
    };
    Ok(TransactionCategoryRecord {
        type_code,
        category_code,
        description,
    })
}

fn account(raw: &RawRecord, ctx: &ValidationContext) -> Result<AccountRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();
    let codec = &ctx.codec;
    let date = |field: &'static str| {
        fields::validate_date_field(field, raw.field(field), &ctx.dates, ctx.patterns())
    };
    let amount = |field: &'static str, non_negative: bool| {
        fields::validate_amount(field, raw.field(field), codec, non_negative, None)
    };

    let account_id = v.check(fields::validate_account_id(raw.field("account_id")));
    let active = v.check(fields::validate_active_status(
        "active_status",
        raw.field("active_status"),
    ));
    let current_balance = v.check(amount("current_balance", false));
    let credit_limit = v.check(amount("credit_limit", true));
    let cash_credit_limit = v.check(amount("cash_credit_limit", true));
    let current_cycle_credit = v.check(amount("current_cycle_credit", true));
    let current_cycle_debit = v.check(amount("current_cycle_debit", true));
    let open_date = v.check(date("open_date").and_then(|d| fields::require_date("open_date", d)));
    let expiration_date = v.check(date("expiration_date"));
    let reissue_date = v.check(date("reissue_date"));
    let address_zip =
        v.check(fields::validate_string_field("address_zip", raw.field("address_zip"), false, 10));
    let group_id =
        v.check(fields::validate_string_field("group_id", raw.field("group_id"), false, 10));

    if let Some(open) = open_date {
        if open > ctx.today {
            v.push(FieldViolation {
                field: "open_date",
                kind: ViolationKind::Range,
                message: format!("{} is in the future", open),
            });
        }
        if let Some(Some(expiry)) = expiration_date {
            if expiry < open {
                v.push(FieldViolation {
                    field: "expiration_date",
                    kind: ViolationKind::Range,
                    message: format!("{} is before open date {}", expiry, open),
                });
            }
        }
    }

    let (
        Some(account_id),
        Some(active),
        Some(current_balance),
        Some(credit_limit),
        Some(cash_credit_limit),
        Some(current_cycle_credit),
        Some(current_cycle_debit),
        Some(open_date),
        Some(expiration_date),
        Some(reissue_date),
        Some(address_zip),
        Some(group_id),
    ) = (
        account_id,
        active,
        current_balance,
        credit_limit,
        cash_credit_limit,
        current_cycle_credit,
        current_cycle_debit,
        open_date,
        expiration_date,
        reissue_date,
        address_zip,
        group_id,
    )
    else {
        return Err(v.0);
    };
    v.finish()?;

    Ok(AccountRecord {
        account_id,
        active,
        current_balance,
        credit_limit,
        cash_credit_limit,
        open_date,
        expiration_date,
        reissue_date,
        current_cycle_credit,
        current_cycle_debit,
        address_zip,
        group_id,
    })
}

fn card(raw: &RawRecord, ctx: &ValidationContext) -> Result<CardRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();

    let card_number = v.check(fields::validate_card_number(
        "card_number",
        raw.field("card_number"),
        ctx.patterns(),
    ));
    let account_id = v.check(fields::validate_account_id(raw.field("account_id")));
    let cvv = v.check(fields::validate_cvv(raw.field("cvv")));
    let embossed_name = v.check(fields::validate_required_string(
        "embossed_name",
        raw.field("embossed_name"),
        50,
    ));
    let expiration_date = v.check(
        fields::validate_date_field(
            "expiration_date",
            raw.field("expiration_date"),
            &ctx.dates,
            ctx.patterns(),
        )
        .and_then(|d| fields::require_date("expiration_date", d))
        .and_then(|d| {
            fields::validate_expiration("expiration_date", d, ctx.today, ctx.max_expiration_years)
        }),
    );
    let active = v.check(fields::validate_active_status(
        "active_status",
        raw.field("active_status"),
    ));

    let (
        Some(card_number),
        Some(account_id),
        Some(cvv),
        Some(embossed_name),
        Some(expiration_date),
        Some(active),
    ) = (card_number, account_id, cvv, embossed_name, expiration_date, active)
    else {
        return Err(v.0);
    };

    Ok(CardRecord {
        card_number,
        account_id,
        cvv,
        embossed_name,
        expiration_date,
        active,
    })
}

fn card_xref(raw: &RawRecord, ctx: &ValidationContext) -> Result<CardXrefRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();
    let card_number = v.check(fields::validate_card_number(
        "card_number",
        raw.field("card_number"),
        ctx.patterns(),
    ));
    let customer_id = v.check(fields::validate_customer_id(raw.field("customer_id")));
    let account_id = v.check(fields::validate_account_id(raw.field("account_id")));

    let (Some(card_number), Some(customer_id), Some(account_id)) =
        (card_number, customer_id, account_id)
    else {
        return Err(v.0);
    };
    Ok(CardXrefRecord {
        card_number,
        customer_id,
        account_id,
    })
}

fn transaction(
    raw: &RawRecord,
    ctx: &ValidationContext,
) -> Result<TransactionRecord, Vec<FieldViolation>> {
    let mut v = Violations::default();
    let optional = |field: &'static str, max_len: usize| {
        fields::validate_string_field(field, raw.field(field), false, max_len)
    };

    let transaction_id = v.check(fields::validate_transaction_id(raw.field("transaction_id")));
    let type_code = v.check(fields::validate_transaction_type(raw.field("type_code")));
    let category_code =
        v.check(fields::validate_transaction_category(raw.field("category_code")));
    let source = v.check(optional("source", 10));
    let description = v.check(optional("description", 100));
    let amount = v.check(fields::validate_amount(
        "amount",
        raw.field("amount"),
        &ctx.codec,
        false,
        Some(&ctx.max_amount),
    ));
    let merchant_id = v.check(fields::validate_merchant_id(raw.field("merchant_id")));
    let merchant_name = v.check(fields::validate_required_string(
        "merchant_name",
        raw.field("merchant_name"),
        50,
    ));
    let merchant_city = v.check(optional("merchant_city", 50));
    let merchant_zip = v.check(optional("merchant_zip", 10));
    let card_number = v.check(fields::validate_card_number(
        "card_number",
        raw.field("card_number"),
        ctx.patterns(),
    ));
    let original_timestamp = v.check(fields::validate_timestamp(
        "original_timestamp",
        raw.field("original_timestamp"),
        &ctx.dates,
    ));
    let processed_timestamp = v.check(fields::validate_timestamp(
        "processed_timestamp",
        raw.field("processed_timestamp"),
        &ctx.dates,
    ));

    let (
        Some(transaction_id),
        Some(type_code),
        Some(category_code),
        Some(source),
        Some(description),
        Some(amount),
        Some(merchant_id),
        Some(merchant_name),
        Some(merchant_city),
        Some(merchant_zip),
        Some(card_number),
        Some(original_timestamp),
        Some(processed_timestamp),
    ) = (
        transaction_id,
        type_code,
        category_code,
        source,
        description,
        amount,
        merchant_id,
        merchant_name,
        merchant_city,
        merchant_zip,
        card_number,
        original_timestamp,
        processed_timestamp,
    )
    else {
        return Err(v.0);
    };

    Ok(TransactionRecord {
        transaction_id,
        type_code,
        category_code,
        source,
        description,
        amount,
        merchant_id,
        merchant_name,
        merchant_city,
        merchant_zip,
        card_number,
        original_timestamp,
        processed_timestamp,
    })
}
