//! Page assembly shared by the bundled storage clients.
//!
//! Both clients hold their keys in sorted order and answer a [`ListRequest`]
//! the way a blob service does: prefix filter, optional delimiter grouping,
//! a page limit counted over objects and common prefixes together, and a
//! continuation token naming the last item of the page.

use super::{ListRequest, ListedObject, ListingPage, ObjectProperties};

/// A listing page whose objects carry an arbitrary value.
#[derive(Debug)]
pub(crate) struct Page<T> {
    pub objects: Vec<(String, T)>,
    pub prefixes: Vec<String>,
    pub continuation: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            prefixes: Vec::new(),
            continuation: None,
        }
    }
}

/// Build one listing page from `entries`, which must be sorted by key.
pub(crate) fn paginate<I>(entries: I, request: &ListRequest) -> ListingPage
where
    I: IntoIterator<Item = (String, ObjectProperties)>,
{
    let page = paginate_entries(entries, request);
    ListingPage {
        objects: page
            .objects
            .into_iter()
            .map(|(name, properties)| ListedObject { name, properties })
            .collect(),
        prefixes: page.prefixes,
        continuation: page.continuation,
    }
}

/// Like [`paginate`], but keeps whatever value travels with each key.
///
/// Callers that load properties lazily page bare keys first and only fetch
/// properties for the objects that made it onto the page.
pub(crate) fn paginate_entries<T, I>(entries: I, request: &ListRequest) -> Page<T>
where
    I: IntoIterator<Item = (String, T)>,
{
    let limit = request.max_results.filter(|max| *max > 0);
    let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
    let resume_after = request.continuation.as_deref();

    let mut page = Page::default();
    let mut emitted = 0usize;
    let mut last_marker: Option<String> = None;

    for (name, value) in entries {
        if !name.starts_with(&request.prefix) {
            continue;
        }
        if let Some(token) = resume_after {
            if name.as_str() <= token {
                continue;
            }
            // The previous page ended on a common prefix; skip the rest of its group.
            if delimiter.is_some_and(|d| token.ends_with(d)) && name.starts_with(token) {
                continue;
            }
        }

        let common_prefix = delimiter.and_then(|d| {
            let rest = &name[request.prefix.len()..];
            rest.find(d)
                .map(|idx| format!("{}{}", request.prefix, &rest[..idx + d.len()]))
        });

        if let Some(prefix) = &common_prefix {
            if page.prefixes.last() == Some(prefix) {
                continue;
            }
        }

        if limit.is_some_and(|max| emitted >= max) {
            page.continuation = last_marker;
            return page;
        }

        match common_prefix {
            Some(prefix) => {
                last_marker = Some(prefix.clone());
                page.prefixes.push(prefix);
            }
            None => {
                last_marker = Some(name.clone());
                page.objects.push((name, value));
            }
        }
        emitted += 1;
    }

    page
}
