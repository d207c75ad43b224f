//! Extraction mapper
//!
//! Converts the OCR gateway's confidence-wrapped payload into the flat
//! `ProcessedReceipt` used by scoring, persistence and export. Missing
//! optional fields get documented defaults and are recorded in
//! `defaults_applied`; nothing here fails.

use chrono::NaiveDate;
use tracing::debug;

use crate::config::MissingDatePolicy;
use crate::models::{
    DefaultedField, ExportedLineItem, ExportedPayment, ExportedReceipt, ProcessedItem,
    ProcessedPayment, ProcessedReceipt, ReceiptDetails, SlipDetail,
};
use crate::normalize::{format_for_display, normalize_date, normalize_retailer, UNKNOWN_RETAILER};
use crate::ocr::types::{number, text, OcrProduct, OcrResponse};

pub const DEFAULT_TIME: &str = "00:00";
pub const UNKNOWN_ITEM: &str = "Unknown Item";
pub const UNKNOWN_PAYMENT_METHOD: &str = "Unknown";

/// Round a currency amount to cents
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Map an OCR response into a processed receipt
///
/// `today` is only used when the slip has no date and the policy is
/// [`MissingDatePolicy::Today`].
pub fn map_ocr_response(
    response: &OcrResponse,
    missing_date: MissingDatePolicy,
    today: NaiveDate,
) -> ProcessedReceipt {
    let mut defaults_applied = Vec::new();

    let retailer_source = text(&response.merchant_detection_sources).or_else(|| {
        response
            .raw_trip_header
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    });
    let retailer = match retailer_source {
        Some(raw) => normalize_retailer(raw),
        None => {
            defaults_applied.push(DefaultedField::Retailer);
            UNKNOWN_RETAILER.to_string()
        }
    };

    let (date, date_inferred) = match text(&response.date).and_then(normalize_date) {
        Some(date) => (date, false),
        None => {
            defaults_applied.push(DefaultedField::Date);
            match missing_date {
                MissingDatePolicy::Today => (today.format("%Y-%m-%d").to_string(), true),
                MissingDatePolicy::Unknown => (String::new(), false),
            }
        }
    };

    let time = match text(&response.time) {
        Some(t) => t.to_string(),
        None => {
            defaults_applied.push(DefaultedField::Time);
            DEFAULT_TIME.to_string()
        }
    };

    let total_amount = match number(&response.total) {
        Some(total) => total,
        None => {
            defaults_applied.push(DefaultedField::Total);
            0.0
        }
    };

    let items = response.products.iter().map(map_product).collect();

    let payments = response
        .payment_methods
        .iter()
        .map(|p| ProcessedPayment {
            method: text(&p.method)
                .unwrap_or(UNKNOWN_PAYMENT_METHOD)
                .to_string(),
            amount: number(&p.amount).unwrap_or(0.0),
        })
        .collect();

    ProcessedReceipt {
        retailer,
        date,
        date_inferred,
        time,
        total_amount,
        items,
        payments,
        is_blurry: response.is_blurry.unwrap_or(false),
        is_screen: response.is_screen.unwrap_or(false),
        // Only an explicit `false` marks the image as not a receipt
        is_receipt: response.is_receipt.unwrap_or(true),
        details: map_details(response),
        defaults_applied,
    }
}

fn map_product(product: &OcrProduct) -> ProcessedItem {
    let description = text(&product.product_name)
        .or_else(|| text(&product.description))
        .or_else(|| {
            product.rsd.as_ref().and_then(|rsd| {
                rsd.value
                    .as_deref()
                    .or(rsd.original_case_value.as_deref())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
        })
        .unwrap_or(UNKNOWN_ITEM)
        .to_string();

    let quantity = number(&product.qty).unwrap_or(1.0);
    let unit_price = number(&product.price).unwrap_or(0.0);
    let total_price =
        number(&product.total_price).unwrap_or_else(|| round_cents(quantity * unit_price));
    // No discount is read off slips yet, so the final price equals the line total.
    let discount = 0.0;

    ProcessedItem {
        description,
        quantity,
        unit_price,
        total_price,
        discount,
        final_price: total_price - discount,
    }
}

fn map_details(response: &OcrResponse) -> ReceiptDetails {
    let recommended_action = response.recommended_action.as_deref().and_then(|raw| {
        raw.parse()
            .map_err(|e| debug!("Ignoring recommendation: {}", e))
            .ok()
    });

    // Some models report the score as a percentage
    let ai_fraud_score = response
        .fraud_risk_score
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| if s > 1.0 { s / 100.0 } else { s })
        .map(|s| s.clamp(0.0, 1.0));

    let mut ai_fraud_flags: Vec<String> = Vec::new();
    for flag in &response.fraud_flags {
        let flag = flag.trim().to_lowercase();
        if !flag.is_empty() && !ai_fraud_flags.contains(&flag) {
            ai_fraud_flags.push(flag);
        }
    }

    ReceiptDetails {
        store_branch: text(&response.store_branch).map(str::to_string),
        vat_amount: number(&response.vat_amount),
        till_number: text(&response.till_number).map(str::to_string),
        receipt_number: text(&response.receipt_number).map(str::to_string),
        barcode_data: text(&response.barcode_data).map(str::to_string),
        payment_method: response
            .payment_methods
            .iter()
            .find_map(|p| text(&p.method))
            .map(str::to_string),
        extraction_confidence: response.extraction_confidence(),
        ai_fraud_score,
        ai_fraud_flags,
        is_direct_photo: response.is_direct_photo,
        recommended_action,
    }
}

/// Build the exported shape straight from a freshly processed receipt
pub fn export_receipt(
    receipt: &ProcessedReceipt,
    image_url: &str,
    is_duplicate: bool,
) -> ExportedReceipt {
    ExportedReceipt {
        retailer_name: receipt.retailer.clone(),
        date: format_for_display(&receipt.date),
        time: receipt.time.clone(),
        is_blurry: receipt.is_blurry,
        is_screen: receipt.is_screen,
        is_receipt: receipt.is_receipt,
        slip_total: receipt.total_amount,
        payment_methods: receipt
            .payments
            .iter()
            .map(|p| ExportedPayment {
                method: p.method.clone(),
                amount: p.amount,
            })
            .collect(),
        image_url: image_url.to_string(),
        is_duplicate,
        product_line_items: receipt
            .items
            .iter()
            .map(|i| ExportedLineItem {
                description: i.description.clone(),
                qty: i.quantity,
                unit_price: i.unit_price,
                discount: i.discount,
                total_price: i.total_price,
                final_line_total: i.final_price,
            })
            .collect(),
    }
}

/// Build the exported shape from a stored slip, moderator corrections applied
pub fn export_slip(detail: &SlipDetail) -> ExportedReceipt {
    let slip = &detail.slip;
    let date = slip
        .effective_text("slip_date")
        .unwrap_or_else(|| slip.slip_date.clone());

    ExportedReceipt {
        retailer_name: slip
            .effective_text("retailer_name")
            .unwrap_or_else(|| slip.retailer_name.clone()),
        date: format_for_display(&date),
        time: slip
            .effective_text("slip_time")
            .unwrap_or_else(|| slip.slip_time.clone()),
        is_blurry: slip.is_blurry,
        is_screen: slip.is_screen,
        is_receipt: slip.is_receipt,
        slip_total: slip.effective_total(),
        payment_methods: detail
            .payments
            .iter()
            .map(|p| ExportedPayment {
                method: p.method.clone(),
                amount: p.amount,
            })
            .collect(),
        image_url: slip.image_url.clone(),
        is_duplicate: slip.is_duplicate,
        product_line_items: detail
            .line_items
            .iter()
            .map(|i| {
                let qty = i.corrected_quantity.unwrap_or(i.quantity);
                let unit_price = i.corrected_unit_price.unwrap_or(i.unit_price);
                let total_price = i.corrected_total_price.unwrap_or(i.total_price);
                ExportedLineItem {
                    description: i
                        .corrected_description
                        .clone()
                        .unwrap_or_else(|| i.description.clone()),
                    qty,
                    unit_price,
                    discount: i.discount,
                    total_price,
                    final_line_total: total_price - i.discount,
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::MockBackend;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 3).unwrap()
    }

    fn parse(json: &str) -> OcrResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_scenario_spar_slip() {
        let response = parse(
            r#"{
                "merchant": "spar 123",
                "date": "01.12.25",
                "total": 141.13,
                "items": [{"description": "BUBBLES", "qty": 1, "unitPrice": 12.99}]
            }"#,
        );
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());

        assert_eq!(receipt.retailer, "SPAR");
        assert_eq!(receipt.date, "2025-12-01");
        assert!(!receipt.date_inferred);
        assert_eq!(receipt.total_amount, 141.13);
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].description, "BUBBLES");
        assert_eq!(receipt.items[0].total_price, 12.99);
        assert_eq!(receipt.items[0].final_price, 12.99);
        assert_eq!(receipt.items[0].discount, 0.0);
        assert_eq!(receipt.defaults_applied, vec![DefaultedField::Time]);
    }

    #[test]
    fn test_defaults_for_empty_payload() {
        let receipt = map_ocr_response(&OcrResponse::default(), MissingDatePolicy::Today, today());

        assert_eq!(receipt.retailer, UNKNOWN_RETAILER);
        assert_eq!(receipt.date, "2025-12-03");
        assert!(receipt.date_inferred);
        assert_eq!(receipt.time, DEFAULT_TIME);
        assert_eq!(receipt.total_amount, 0.0);
        assert!(receipt.is_receipt);
        assert!(receipt.was_defaulted(DefaultedField::Retailer));
        assert!(receipt.was_defaulted(DefaultedField::Date));
        assert!(receipt.was_defaulted(DefaultedField::Total));
    }

    #[test]
    fn test_missing_date_left_unknown() {
        let receipt =
            map_ocr_response(&OcrResponse::default(), MissingDatePolicy::Unknown, today());
        assert_eq!(receipt.date, "");
        assert!(!receipt.date_inferred);
        assert!(receipt.was_defaulted(DefaultedField::Date));
    }

    #[test]
    fn test_item_defaults_and_computed_total() {
        let response = parse(
            r#"{
                "products": [
                    {"rsd": {"value": "MILK 2L"}, "qty": {"confidence": 80, "value": 3}, "price": {"confidence": 80, "value": 0.1}},
                    {"rsd": {"original_case_value": "Bread"}, "price": 15.5},
                    {}
                ]
            }"#,
        );
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());

        assert_eq!(receipt.items[0].description, "MILK 2L");
        assert_eq!(receipt.items[0].total_price, 0.3);
        assert_eq!(receipt.items[1].description, "Bread");
        assert_eq!(receipt.items[1].quantity, 1.0);
        assert_eq!(receipt.items[1].total_price, 15.5);
        assert_eq!(receipt.items[2].description, UNKNOWN_ITEM);
        assert_eq!(receipt.items[2].unit_price, 0.0);
        assert_eq!(receipt.items[2].total_price, 0.0);
    }

    #[test]
    fn test_not_a_receipt_only_when_stated() {
        let stated = parse(r#"{"is_receipt": false}"#);
        assert!(!map_ocr_response(&stated, MissingDatePolicy::Today, today()).is_receipt);

        let unstated = parse(r#"{"is_receipt": null}"#);
        assert!(map_ocr_response(&unstated, MissingDatePolicy::Today, today()).is_receipt);
    }

    #[test]
    fn test_computed_line_total_is_quantity_times_price() {
        let response = parse(
            r#"{"products": [
                {"description": "EGGS 6", "qty": 2, "price": 12.5},
                {"description": "APPLES", "qty": 3, "price": 4.25},
                {"description": "COKE", "qty": 4, "price": 0.5}
            ]}"#,
        );
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());

        for item in &receipt.items {
            assert_eq!(item.total_price, item.quantity * item.unit_price);
            assert_eq!(item.final_price, item.total_price);
        }
        assert_eq!(receipt.items[1].total_price, 12.75);
    }

    #[test]
    fn test_description_prefers_product_name() {
        let response = parse(
            r#"{"products": [{"product_name": "Full Name", "description": "short", "rsd": {"value": "RAW"}}]}"#,
        );
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());
        assert_eq!(receipt.items[0].description, "Full Name");
    }

    #[test]
    fn test_retailer_falls_back_to_trip_header() {
        let response = parse(r#"{"raw_trip_header": "Checkers Sixty60"}"#);
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());
        assert_eq!(receipt.retailer, "CHECKERS");
        assert!(!receipt.was_defaulted(DefaultedField::Retailer));
    }

    #[test]
    fn test_payments_and_details() {
        let response = parse(
            r#"{
                "paymentMethods": [{"amount": 10}, {"method": "Card", "amount": "R 20,50"}],
                "receipt_number": "  ",
                "till_number": "T04",
                "fraud_risk_score": 35,
                "fraud_flags": ["Screenshot_Detected", "screenshot_detected", ""],
                "recommended_action": "manual review"
            }"#,
        );
        let receipt = map_ocr_response(&response, MissingDatePolicy::Today, today());

        assert_eq!(receipt.payments[0].method, UNKNOWN_PAYMENT_METHOD);
        assert_eq!(receipt.payments[1].amount, 20.5);
        assert_eq!(receipt.details.payment_method.as_deref(), Some("Card"));
        assert_eq!(receipt.details.receipt_number, None);
        assert_eq!(receipt.details.till_number.as_deref(), Some("T04"));
        assert_eq!(receipt.details.ai_fraud_score, Some(0.35));
        assert_eq!(receipt.details.ai_fraud_flags, vec!["screenshot_detected"]);
        assert_eq!(
            receipt.details.recommended_action,
            Some(crate::models::RecommendedAction::ManualReview)
        );
    }

    #[test]
    fn test_export_of_mock_slip() {
        let receipt = map_ocr_response(&MockBackend::canned_slip(), MissingDatePolicy::Today, today());
        let exported = export_receipt(&receipt, "https://cdn/slip.jpg", false);

        assert_eq!(exported.retailer_name, "SPAR");
        assert_eq!(exported.date, "01/12/2025");
        assert_eq!(exported.time, "19:00");
        assert_eq!(exported.slip_total, 141.13);
        assert_eq!(exported.payment_methods[0].method, "Cash");
        assert_eq!(exported.product_line_items[0].description, "MESSARIS BUBBLES 100GR");
        assert_eq!(exported.product_line_items[0].final_line_total, 12.99);

        let json = serde_json::to_value(&exported).unwrap();
        for key in [
            "retailer_name",
            "date",
            "time",
            "is_blurry",
            "is_screen",
            "is_receipt",
            "slip_total",
            "payment_methods",
            "image_url",
            "is_duplicate",
            "product_line_items",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
