use crate::error::Result;
use crate::models::Page;
use std::future::Future;

/// Walk a limit/offset paginated endpoint into one ordered list.
///
/// `max == 0` collects everything. Pages are fetched strictly one after
/// another; the last request's limit shrinks to what is still needed when
/// bounded. The walk ends when `max` items are held (trimmed to exactly
/// `max`), when a page has no `next`, or when a page comes back empty.
/// Errors from `fetch_page` are returned as-is.
pub async fn collect_paged<T, F, Fut>(page_size: usize, max: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let page_size = page_size.max(1);
    let mut limit = if max > 0 { page_size.min(max) } else { page_size };
    let mut offset = 0;
    let mut out: Vec<T> = Vec::new();

    loop {
        let page = fetch_page(limit, offset).await?;
        let got = page.items.len();
        let has_next = page.has_next();
        out.extend(page.items);

        if max > 0 && out.len() >= max {
            out.truncate(max);
            return Ok(out);
        }
        if !has_next || got == 0 {
            return Ok(out);
        }
        offset += limit;

        if max > 0 {
            let remaining = max - out.len();
            if remaining < limit {
                limit = remaining;
            }
        }
    }
}
