use serde::{Deserialize, Serialize};

/// A monitored product. Supplied by configuration and immutable for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub brand: String,
    pub name: String,
    pub map_price: i64,
    pub search_keyword: String,
}

impl Product {
    pub fn new(
        brand: impl Into<String>,
        name: impl Into<String>,
        map_price: i64,
        search_keyword: impl Into<String>,
    ) -> Self {
        Self {
            brand: brand.into(),
            name: name.into(),
            map_price,
            search_keyword: search_keyword.into(),
        }
    }
}

/// One search result as returned by a listing source, before price parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub vendor_name: String,
    pub title: String,
    pub price_text: String,
    pub url: String,
}

impl RawListing {
    pub fn new(
        vendor_name: impl Into<String>,
        title: impl Into<String>,
        price_text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            title: title.into(),
            price_text: price_text.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub lprice: String,
    #[serde(default)]
    pub mall_name: String,
}

impl From<SearchItem> for RawListing {
    fn from(item: SearchItem) -> Self {
        RawListing {
            vendor_name: item.mall_name,
            title: strip_markup(&item.title),
            price_text: item.lprice,
            url: item.link,
        }
    }
}

/// Search APIs highlight the matched keyword with `<b>` tags.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_item_to_raw_listing() {
        let item: SearchItem = serde_json::from_value(serde_json::json!({
            "title": "<b>고래미</b> 타코와사비 500g",
            "link": "https://shop.example.com/p/1",
            "lprice": "15300",
            "mallName": "A마켓",
            "productId": "123"
        }))
        .unwrap();

        let listing = RawListing::from(item);
        assert_eq!(listing.title, "고래미 타코와사비 500g");
        assert_eq!(listing.vendor_name, "A마켓");
        assert_eq!(listing.price_text, "15300");
        assert_eq!(listing.url, "https://shop.example.com/p/1");
    }
}
