//! Discount list endpoint: POST with an offset in the JSON body.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ListingQuery;
use crate::envelope::decode_envelope;
use crate::harvest::{
    HarvestError, HarvestReport, HarvestRequest, Listing, PageInfo, PageMapper, PageResult,
};
use crate::pool::TOPIC_SHOP;
use crate::transport::{ApiRequest, FetchError, RawResponse};

/// Discount list endpoint.
pub const DISCOUNT_LIST_PATH: &str = "/api/marketing/v3/public/discount/list/";

/// Discounts per page (`limit`).
pub const DISCOUNT_PAGE_SIZE: u32 = 10;

/// Page bound, seed included.
pub const DISCOUNT_MAX_PAGES: u32 = 101;

/// The endpoint's `offset` is a page index, not an item count: it advances
/// by one per page of `limit` discounts. If the endpoint ever counts items
/// instead, pages overlap and [`DiscountListing::shortfall`] turns non-zero.
const OFFSET_STEP: u64 = 1;

/// Seller discount type.
const DISCOUNT_TYPE_SELLER: u32 = 1;

/// Ongoing and upcoming discounts.
const TIME_STATUS_ACTIVE: u32 = 2;

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SellerDiscount {
    #[serde(default)]
    pub discount_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time_status: i64,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub source: i64,
    #[serde(default)]
    pub global_discount_id: i64,
}

/// One discount promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Discount {
    /// Discount type.
    #[serde(default)]
    pub discount_type: i64,
    /// Seller-side details, including the ID.
    #[serde(default)]
    pub seller_discount: SellerDiscount,
}

/// `data` of the discount list response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscountList {
    /// Discounts on this page.
    #[serde(default)]
    pub discounts: Vec<Discount>,
    /// Total discounts.
    #[serde(default)]
    pub total_count: u64,
}

/// Active seller discounts, deduplicated by discount ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscountListing;

impl DiscountListing {
    /// Builds the harvest request for `query`. `list_type` and `page_size` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Validation`] if the query is incomplete.
    pub fn request(query: &ListingQuery) -> Result<HarvestRequest, HarvestError> {
        query.validate()?;
        let template = query.session_request(ApiRequest::post(DISCOUNT_LIST_PATH).with_body(json!({
            "discount_type": DISCOUNT_TYPE_SELLER,
            "time_status": TIME_STATUS_ACTIVE,
            "offset": 0,
            "limit": DISCOUNT_PAGE_SIZE,
        })));
        Ok(HarvestRequest::counted(
            template,
            DISCOUNT_PAGE_SIZE,
            PageMapper::body_offset("offset", OFFSET_STEP),
        )
        .with_max_pages(DISCOUNT_MAX_PAGES)
        .with_topic(TOPIC_SHOP))
    }

    /// Number of discounts `total_count` promised that the harvest did not return.
    #[must_use]
    pub fn shortfall(report: &HarvestReport) -> u64 {
        let kept = u64::try_from(report.records_kept).unwrap_or(u64::MAX);
        report.total_reported.saturating_sub(kept)
    }
}

impl Listing for DiscountListing {
    type Record = Discount;
    type Key = i64;
    type Output = Discount;

    fn decode(&self, raw: &RawResponse) -> Result<PageResult<Discount>, FetchError> {
        let data: DiscountList = decode_envelope(raw)?;
        Ok(PageResult {
            records: data.discounts,
            info: PageInfo {
                total: data.total_count,
                next_cursor: None,
                has_next_page: false,
            },
        })
    }

    fn extract(&self, discount: Discount) -> Vec<(i64, Discount)> {
        vec![(discount.seller_discount.discount_id, discount)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::harvest::PageRef;

    #[test]
    fn test_request_posts_offset_per_page() {
        let query = ListingQuery::new("s=1;", "1001", "MY", "");
        let request = DiscountListing::request(&query).unwrap();

        let page3 = request.request_for(&PageRef::Number(3));
        assert_eq!(page3.method, reqwest::Method::POST);
        assert_eq!(
            page3.body.unwrap(),
            json!({"discount_type": 1, "time_status": 2, "offset": 2, "limit": 10})
        );
        assert!(!page3.query.contains_key("page_number"));
        assert_eq!(request.max_pages(), Some(DISCOUNT_MAX_PAGES));
    }

    #[test]
    fn test_shortfall_counts_missing_discounts() {
        let mut report = HarvestReport {
            total_reported: 25,
            records_kept: 25,
            ..HarvestReport::default()
        };
        assert_eq!(DiscountListing::shortfall(&report), 0);

        report.records_kept = 19;
        assert_eq!(DiscountListing::shortfall(&report), 6);

        report.records_kept = 30;
        assert_eq!(DiscountListing::shortfall(&report), 0);
    }

    #[test]
    fn test_decode_uses_total_count() {
        let body = json!({
            "code": 0,
            "data": {
                "discounts": [{"discount_type": 1, "seller_discount": {"discount_id": 77, "name": "summer"}}],
                "total_count": 23
            }
        });
        let raw = RawResponse::ok("https://seller.example.com/discounts", body.to_string());
        let page = DiscountListing.decode(&raw).unwrap();
        assert_eq!(page.info.total, 23);
        assert_eq!(page.records[0].seller_discount.discount_id, 77);
    }

    #[test]
    fn test_same_discount_keys_collide() {
        let discount = Discount {
            seller_discount: SellerDiscount {
                discount_id: 5,
                ..SellerDiscount::default()
            },
            ..Discount::default()
        };
        let (key, _) = DiscountListing.extract(discount).remove(0);
        assert_eq!(key, 5);
    }
}
