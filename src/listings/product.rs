//! Product list endpoint: IDs only, or full products.

use serde::{Deserialize, Serialize};

use super::{ListingQuery, WirePageInfo};
use crate::envelope::decode_envelope;
use crate::harvest::{HarvestError, HarvestRequest, Listing, PageInfo, PageMapper, PageResult};
use crate::pool::TOPIC_PRODUCT;
use crate::transport::{ApiRequest, FetchError, RawResponse};

/// Product list endpoint.
pub const PRODUCT_LIST_PATH: &str = "/api/v3/mpsku/list/v2/get_product_list";

/// Default products per page.
pub const PRODUCT_PAGE_SIZE: u32 = 48;

/// A product model (SKU variant).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Model {
    /// Model ID.
    #[serde(default)]
    pub id: u64,
    /// Model name.
    #[serde(default)]
    pub name: String,
}

/// A campaign the product currently takes part in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OngoingCampaign {
    /// ID of the product as listed in the campaign.
    #[serde(default)]
    pub product_id: u64,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PromotionDetail {
    #[serde(default)]
    pub ongoing_campaigns: Vec<OngoingCampaign>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductStatistics {
    #[serde(default)]
    pub liked_count: i64,
    #[serde(default)]
    pub sold_count: i64,
    #[serde(default)]
    pub view_count: i64,
}

impl ProductStatistics {
    /// Nobody has liked, bought or viewed the product.
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.liked_count == 0 && self.sold_count == 0 && self.view_count == 0
    }
}

/// Default number of IDs [`inactive_product_ids`] returns.
pub const INACTIVE_BATCH: usize = 50;

/// A product as the list endpoint reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Product {
    /// Product ID.
    #[serde(default)]
    pub id: u64,
    /// Product name.
    #[serde(default)]
    pub name: String,
    /// Campaign participation.
    #[serde(default)]
    pub promotion_detail: PromotionDetail,
    /// SKU variants.
    #[serde(default)]
    pub model_list: Vec<Model>,
    /// Engagement counters.
    #[serde(default)]
    pub statistics: ProductStatistics,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub create_time: i64,
}

/// `data` of the product list response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductListData {
    /// Products on this page.
    #[serde(default)]
    pub products: Vec<Product>,
    /// Pagination metadata.
    #[serde(default)]
    pub page_info: WirePageInfo,
}

fn decode_products(raw: &RawResponse) -> Result<PageResult<Product>, FetchError> {
    let data: ProductListData = decode_envelope(raw)?;
    Ok(PageResult {
        records: data.products,
        info: PageInfo {
            total: data.page_info.total,
            next_cursor: None,
            has_next_page: false,
        },
    })
}

fn product_list_request(query: &ListingQuery) -> Result<HarvestRequest, HarvestError> {
    query.validate()?;
    let page_size = query.page_size.unwrap_or(PRODUCT_PAGE_SIZE);
    let template = query
        .session_request(ApiRequest::get(PRODUCT_LIST_PATH))
        .with_query("list_type", query.list_type.as_str())
        .with_query("need_ads", "true")
        .with_query("page_size", page_size.to_string());
    Ok(
        HarvestRequest::counted(template, page_size, PageMapper::query("page_number"))
            .with_topic(TOPIC_PRODUCT),
    )
}

/// Collects the distinct IDs of every listed product, plus the IDs of the
/// ongoing-campaign products attached to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductIdListing;

impl ProductIdListing {
    /// Builds the harvest request for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Validation`] if the query is incomplete.
    pub fn request(query: &ListingQuery) -> Result<HarvestRequest, HarvestError> {
        product_list_request(query)
    }
}

impl Listing for ProductIdListing {
    type Record = Product;
    type Key = u64;
    type Output = ();

    fn decode(&self, raw: &RawResponse) -> Result<PageResult<Product>, FetchError> {
        decode_products(raw)
    }

    fn extract(&self, product: Product) -> Vec<(u64, ())> {
        std::iter::once(product.id)
            .chain(
                product
                    .promotion_detail
                    .ongoing_campaigns
                    .iter()
                    .map(|campaign| campaign.product_id)
                    .filter(|id| *id != 0),
            )
            .map(|id| (id, ()))
            .collect()
    }
}

/// Collects full products keyed by ID; a product reported twice keeps the
/// copy written last.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductListing;

impl ProductListing {
    /// Builds the harvest request for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Validation`] if the query is incomplete.
    pub fn request(query: &ListingQuery) -> Result<HarvestRequest, HarvestError> {
        product_list_request(query)
    }
}

impl Listing for ProductListing {
    type Record = Product;
    type Key = u64;
    type Output = Product;

    fn decode(&self, raw: &RawResponse) -> Result<PageResult<Product>, FetchError> {
        decode_products(raw)
    }

    fn extract(&self, product: Product) -> Vec<(u64, Product)> {
        vec![(product.id, product)]
    }
}

/// IDs of the `limit` oldest products with no likes, sales or views.
///
/// Products created at the same second keep their input order.
#[must_use]
pub fn inactive_product_ids<I>(products: I, limit: usize) -> Vec<u64>
where
    I: IntoIterator<Item = Product>,
{
    let mut inactive: Vec<Product> = products
        .into_iter()
        .filter(|product| product.statistics.is_untouched())
        .collect();
    inactive.sort_by_key(|product| product.create_time);
    inactive.into_iter().take(limit).map(|product| product.id).collect()
}
