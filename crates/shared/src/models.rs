//! Small data shapes shared with the remote service.

use serde::{Deserialize, Serialize};

/// Pagination parameters appended to an endpoint as `page` and `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self { page: 1, limit: 100 }
    }
}

impl PageParams {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self
        }
    }

    /// Query pairs in wire form.
    pub fn to_query(self) -> [(String, String); 2] {
        [
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ]
    }
}

/// Pagination metadata returned next to list payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub pages: u32,
}

impl PageInfo {
    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_clamp_and_advance() {
        let params = PageParams::new(0, 0);
        assert_eq!(params, PageParams { page: 1, limit: 1 });
        assert_eq!(params.next().page, 2);
        assert_eq!(
            PageParams::new(3, 25).to_query(),
            [
                ("page".to_string(), "3".to_string()),
                ("limit".to_string(), "25".to_string())
            ]
        );
    }

    #[test]
    fn next_page_saturates() {
        let last = PageParams::new(u32::MAX, 10);
        assert_eq!(last.next().page, u32::MAX);
    }

    #[test]
    fn page_info_tolerates_missing_fields() {
        let info: PageInfo = serde_json::from_str(r#"{"total": 40, "page": 1, "pages": 2}"#).unwrap();
        assert!(info.has_next());
        assert_eq!(info.size, 0);
    }
}
