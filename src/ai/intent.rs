//! Keyword intent classification of inbound text.
//!
//! Runs locally and independently of the model reply.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PriceInquiry,
    LocationInquiry,
    HoursInquiry,
    AvailabilityInquiry,
    OrderIntent,
    Complaint,
    ShippingInquiry,
    PaymentInquiry,
    GeneralInquiry,
}

/// Categories in match order; the first hit wins.
const TABLE: &[(Intent, &[&str])] = &[
    (Intent::PriceInquiry, &["harga", "berapa", "price", "cost", "biaya"]),
    (Intent::LocationInquiry, &["lokasi", "alamat", "dimana", "where", "tempat"]),
    (
        Intent::HoursInquiry,
        &["jam", "buka", "tutup", "kapan", "hours", "operasional"],
    ),
    (
        Intent::AvailabilityInquiry,
        &["ada", "ready", "stock", "tersedia", "available"],
    ),
    (Intent::OrderIntent, &["pesan", "order", "beli", "buy", "mau"]),
    (
        Intent::Complaint,
        &["komplain", "kecewa", "marah", "complaint", "buruk", "jelek"],
    ),
    (
        Intent::ShippingInquiry,
        &["kirim", "ongkir", "shipping", "delivery", "pengiriman"],
    ),
    (
        Intent::PaymentInquiry,
        &["bayar", "payment", "transfer", "cash", "pembayaran"],
    ),
];

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::PriceInquiry => "price_inquiry",
            Intent::LocationInquiry => "location_inquiry",
            Intent::HoursInquiry => "hours_inquiry",
            Intent::AvailabilityInquiry => "availability_inquiry",
            Intent::OrderIntent => "order_intent",
            Intent::Complaint => "complaint",
            Intent::ShippingInquiry => "shipping_inquiry",
            Intent::PaymentInquiry => "payment_inquiry",
            Intent::GeneralInquiry => "general_inquiry",
        }
    }
}

pub fn classify(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::GeneralInquiry)
}
