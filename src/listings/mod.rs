//! Concrete seller-platform listings.
//!
//! Each listing pairs an endpoint with its page decoder and its keying rule:
//!
//! | Listing | Endpoint | Mode | Key | Kept value |
//! |---------|----------|------|-----|------------|
//! | [`ProductIdListing`] | product list | counted, 48/page | product ID (+ campaign product IDs) | nothing |
//! | [`ProductListing`] | product list | counted, 48/page | product ID | full product, last write wins |
//! | [`ShippingDaysListing`] | product search | cursor, 50/page | product ID | detail, unless already at target days-to-ship |
//! | [`DiscountListing`] | discount list (POST) | counted, 10/page | discount ID | discount |
//!
//! [`inactive_product_ids`] narrows a [`ProductListing`] harvest to the
//! oldest products nobody has engaged with.

mod discount;
mod product;
mod shipping;

use uuid::Uuid;

pub use discount::{
    DISCOUNT_LIST_PATH, DISCOUNT_MAX_PAGES, DISCOUNT_PAGE_SIZE, Discount, DiscountList,
    DiscountListing, SellerDiscount,
};
pub use product::{
    INACTIVE_BATCH, Model, OngoingCampaign, PRODUCT_LIST_PATH, PRODUCT_PAGE_SIZE, Product,
    ProductIdListing, ProductListData, ProductListing, ProductStatistics, PromotionDetail,
    inactive_product_ids,
};
pub use shipping::{
    PRODUCT_SEARCH_PATH, ProductDetail, ProductDetailListData, SEARCH_PAGE_SIZE,
    ShippingDaysListing,
};

use crate::harvest::HarvestError;
use crate::transport::ApiRequest;

/// Value of the `SPC_CDS_VER` query parameter.
pub const SPC_CDS_VERSION: &str = "2";

/// Pagination metadata as the platform writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct WirePageInfo {
    /// Page number echoed back.
    #[serde(default)]
    pub page_number: u64,
    /// Page size echoed back.
    #[serde(default)]
    pub page_size: u64,
    /// Total records in the listing.
    #[serde(default)]
    pub total: u64,
    /// Cursor of the next page (cursor endpoints only).
    #[serde(default)]
    pub cursor: String,
}

/// Caller inputs shared by every listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    /// Session cookie header.
    pub cookies: String,
    /// Shop identifier (`cnsc_shop_id`).
    pub shop_id: String,
    /// Region code (`cbsc_shop_region`).
    pub region: String,
    /// Listing filter (`list_type`), e.g. `live_all`.
    pub list_type: String,
    /// Overrides the listing's default page size.
    pub page_size: Option<u32>,
}

impl ListingQuery {
    /// Creates a query with the default page size.
    pub fn new(
        cookies: impl Into<String>,
        shop_id: impl Into<String>,
        region: impl Into<String>,
        list_type: impl Into<String>,
    ) -> Self {
        Self {
            cookies: cookies.into(),
            shop_id: shop_id.into(),
            region: region.into(),
            list_type: list_type.into(),
            page_size: None,
        }
    }

    /// Rejects empty session, shop or region before any request is made.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Validation`] naming the empty fields.
    pub fn validate(&self) -> Result<(), HarvestError> {
        let missing: Vec<&str> = [
            ("cookies", &self.cookies),
            ("shop_id", &self.shop_id),
            ("region", &self.region),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(HarvestError::validation(format!(
                "required parameters are empty: {}",
                missing.join(", ")
            )));
        }
        if self.page_size == Some(0) {
            return Err(HarvestError::validation("page_size must be at least 1"));
        }
        Ok(())
    }

    /// Starts a session-scoped request: a fresh `SPC_CDS` cache-buster is
    /// appended to the cookie and set on the query, with the shop and region.
    pub(crate) fn session_request(&self, template: ApiRequest) -> ApiRequest {
        let spc_cds = Uuid::new_v4().to_string();
        template
            .with_cookies(append_cookie(&self.cookies, "SPC_CDS", &spc_cds))
            .with_query("SPC_CDS", spc_cds)
            .with_query("SPC_CDS_VER", SPC_CDS_VERSION)
            .with_query("cnsc_shop_id", self.shop_id.as_str())
            .with_query("cbsc_shop_region", self.region.as_str())
    }
}

fn append_cookie(cookies: &str, name: &str, value: &str) -> String {
    let trimmed = cookies.trim_end();
    if trimmed.is_empty() || trimmed.ends_with(';') {
        format!("{trimmed}{name}={value};")
    } else {
        format!("{trimmed}; {name}={value};")
    }
}
