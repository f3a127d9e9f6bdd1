use std::future::Future;

/// One page of a list operation.
///
/// `fetched` is the number of raw records the remote returned, which can be
/// larger than `items.len()` when malformed records were dropped while
/// parsing. Only `fetched` decides whether more pages follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub fetched: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, fetched: usize) -> Self {
        Self { items, fetched }
    }

    #[cfg(test)]
    pub fn full(items: Vec<T>) -> Self {
        let fetched = items.len();
        Self { items, fetched }
    }
}

/// Fetch pages at increasing offsets until one comes back with fewer than
/// `page_size` records. A short page (including an empty one) is the only
/// end-of-data signal; totals reported by the remote are ignored.
pub async fn collect_pages<T, E, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    let page_size = page_size.max(1);
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch(offset).await?;
        let fetched = page.fetched;
        items.extend(page.items);
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    Ok(items)
}
