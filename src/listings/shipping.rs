//! Product search endpoint, walked by cursor, filtered by days-to-ship.
//!
//! Used to find products whose shipping time still needs changing: products
//! already at the target value are filtered out.

use serde::{Deserialize, Serialize};

use super::{ListingQuery, Model, WirePageInfo};
use crate::envelope::decode_envelope;
use crate::harvest::{HarvestError, HarvestRequest, Listing, PageInfo, PageMapper, PageRef, PageResult};
use crate::pool::TOPIC_PRODUCT;
use crate::transport::{ApiRequest, FetchError, RawResponse};

/// Product search endpoint.
pub const PRODUCT_SEARCH_PATH: &str = "/api/v3/product/search_product_list_v2/";

/// Default products per page.
pub const SEARCH_PAGE_SIZE: u32 = 50;

const SOURCE_ATTRIBUTE_TOOL: &str = "attribute_tool";
const SEARCH_VERSION: &str = "4.0.0";

/// A product as the search endpoint reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductDetail {
    /// Product ID.
    #[serde(default)]
    pub id: u64,
    /// Current days-to-ship setting.
    #[serde(default)]
    pub days_to_ship: i64,
    /// Estimated delivery days.
    #[serde(default)]
    pub estimated_days: i64,
    /// Whether the product is pre-order.
    #[serde(default)]
    pub pre_order: bool,
    /// SKU variants.
    #[serde(default)]
    pub model_list: Vec<Model>,
}

/// `data` of the search response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductDetailListData {
    /// Products on this page.
    #[serde(default)]
    pub list: Vec<ProductDetail>,
    /// Pagination metadata, including the next cursor.
    #[serde(default)]
    pub page_info: WirePageInfo,
}

/// Products whose days-to-ship differs from `days_to_ship`.
#[derive(Debug, Clone, Copy)]
pub struct ShippingDaysListing {
    days_to_ship: i64,
}

impl ShippingDaysListing {
    /// Creates a listing that skips products already at `days_to_ship`.
    #[must_use]
    pub fn new(days_to_ship: i64) -> Self {
        Self { days_to_ship }
    }

    /// Returns the target value.
    #[must_use]
    pub fn days_to_ship(&self) -> i64 {
        self.days_to_ship
    }

    /// Builds the cursor harvest request for `query`.
    ///
    /// The first page is requested as `page_number=1`; later pages by `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Validation`] if the query is incomplete.
    pub fn request(query: &ListingQuery) -> Result<HarvestRequest, HarvestError> {
        query.validate()?;
        let page_size = query.page_size.unwrap_or(SEARCH_PAGE_SIZE);
        let template = query
            .session_request(ApiRequest::get(PRODUCT_SEARCH_PATH))
            .with_query("list_type", query.list_type.as_str())
            .with_query("need_ads", "true")
            .with_query("page_size", page_size.to_string())
            .with_query("source", SOURCE_ATTRIBUTE_TOOL)
            .with_query("version", SEARCH_VERSION);

        let mapper = PageMapper::custom(|page, request| match page {
            PageRef::Cursor(Some(cursor)) => {
                request.query.insert("cursor".to_string(), cursor.clone());
            }
            PageRef::Cursor(None) | PageRef::Number(_) => {
                request.query.insert("page_number".to_string(), "1".to_string());
            }
        });

        Ok(HarvestRequest::cursor(template, mapper)
            .with_cursor_page_size(page_size)
            .with_topic(TOPIC_PRODUCT))
    }
}

impl Listing for ShippingDaysListing {
    type Record = ProductDetail;
    type Key = u64;
    type Output = ProductDetail;

    fn decode(&self, raw: &RawResponse) -> Result<PageResult<ProductDetail>, FetchError> {
        let data: ProductDetailListData = decode_envelope(raw)?;
        let cursor = data.page_info.cursor;
        Ok(PageResult {
            info: PageInfo {
                total: data.page_info.total,
                has_next_page: !cursor.is_empty() && !data.list.is_empty(),
                next_cursor: Some(cursor).filter(|c| !c.is_empty()),
            },
            records: data.list,
        })
    }

    fn extract(&self, product: ProductDetail) -> Vec<(u64, ProductDetail)> {
        if product.days_to_ship == self.days_to_ship {
            return Vec::new();
        }
        vec![(product.id, product)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_products_at_target_are_filtered() {
        let listing = ShippingDaysListing::new(3);
        let at_target = ProductDetail {
            id: 1,
            days_to_ship: 3,
            ..ProductDetail::default()
        };
        let off_target = ProductDetail {
            id: 2,
            days_to_ship: 7,
            ..ProductDetail::default()
        };
        assert!(listing.extract(at_target).is_empty());
        assert_eq!(listing.extract(off_target).len(), 1);
    }

    #[test]
    fn test_decode_reads_cursor() {
        let body = json!({
            "code": 0,
            "data": {
                "list": [{"id": 5, "days_to_ship": 2}],
                "page_info": {"total": 120, "cursor": "eyJwIjoyfQ"}
            }
        });
        let raw = RawResponse::ok("https://seller.example.com/search", body.to_string());
        let page = ShippingDaysListing::new(3).decode(&raw).unwrap();
        assert_eq!(page.info.next_cursor.as_deref(), Some("eyJwIjoyfQ"));
        assert!(page.info.has_next_page);
        assert_eq!(page.info.total, 120);
    }

    #[test]
    fn test_empty_cursor_ends_walk() {
        let body = json!({"code": 0, "data": {"list": [{"id": 5}], "page_info": {"cursor": ""}}});
        let raw = RawResponse::ok("https://seller.example.com/search", body.to_string());
        let page = ShippingDaysListing::new(3).decode(&raw).unwrap();
        assert!(!page.info.has_next_page);
        assert_eq!(page.info.next_cursor, None);
    }

    #[test]
    fn test_first_page_uses_page_number_then_cursor() {
        let query = ListingQuery::new("s=1;", "1001", "MY", "live_all");
        let request = ShippingDaysListing::request(&query).unwrap();

        let first = request.request_for(&request.seed_page());
        assert_eq!(first.query["page_number"], "1");
        assert!(!first.query.contains_key("cursor"));
        assert_eq!(first.query["source"], "attribute_tool");
        assert_eq!(first.query["version"], "4.0.0");
        assert_eq!(first.query["page_size"], "50");

        let next = request.request_for(&PageRef::Cursor(Some("abc".to_string())));
        assert_eq!(next.query["cursor"], "abc");
        assert!(!next.query.contains_key("page_number"));
    }
}
