use std::convert::Infallible;

use rocket::request::{FromRequest, Outcome};
use rocket::Request;

/// Longest page a client can ask for.
pub const MAX_PAGE_LENGTH: u32 = 100;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageState {
    pub page_length: u32,
    pub page: u32,
}

impl Default for PageState {
    fn default() -> Self {
        PageState {
            page_length: 20,
            page: 0,
        }
    }
}

impl PageState {
    pub fn new(page: u32, page_length: u32) -> PageState {
        PageState {
            page_length: page_length.clamp(1, MAX_PAGE_LENGTH),
            page,
        }
    }

    pub fn skip(&self) -> u64 {
        self.page as u64 * self.page_length as u64
    }

    pub fn limit(&self) -> i64 {
        self.page_length as i64
    }
}

#[async_trait]
impl<'r> FromRequest<'r> for PageState {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let length: Option<u32> = request
            .query_value("len")
            .and_then(|it| it.ok())
            .or_else(|| request.query_value("l").and_then(|it| it.ok()));

        let page: Option<u32> = request
            .query_value("page")
            .and_then(|it| it.ok())
            .or_else(|| request.query_value("p").and_then(|it| it.ok()));

        match (page, length) {
            (None, None) => Outcome::Success(Default::default()),
            (page, length) => Outcome::Success(PageState::new(
                page.unwrap_or(0),
                length.unwrap_or(PageState::default().page_length),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets() {
        let page = PageState::new(3, 10);
        assert_eq!(page.skip(), 30);
        assert_eq!(page.limit(), 10);

        assert_eq!(PageState::default().skip(), 0);
    }

    #[test]
    fn page_length_is_capped() {
        assert_eq!(PageState::new(0, 5000).page_length, MAX_PAGE_LENGTH);
        assert_eq!(PageState::new(0, 0).page_length, 1);
    }
}
