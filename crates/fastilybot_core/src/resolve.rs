//! Turning task specifiers into concrete title sets.
//!
//! A [`Specifier`] names where a set of pages comes from: a numbered remote report, the members
//! of a category, the pages transcluding a template, a configuration page whose links list
//! further categories/templates/titles, or a literal collection. [`Resolver`] evaluates them
//! against a wiki, and [`Resolver::difference_of`] folds a list of them by set subtraction.

use std::collections::HashSet;

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::client::WikiReadApi;
use crate::query::QueryCache;
use crate::report::ReportSource;
use crate::title::{Namespace, Title};

/// Filter applied to bare specifiers when the caller does not say otherwise.
pub const DEFAULT_NAMESPACES: &[Namespace] = &[Namespace::File];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid specifier '{0}': expected a report id or a Category:, Template:, User: or Wikipedia: title")]
    InvalidSpecifier(String),
    #[error("'{0}' is not a category")]
    NotACategory(String),
    #[error("difference_of needs at least one specifier")]
    EmptyDifference,
}

/// Namespace filter attached to one specifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NsFilter {
    /// Use the resolver call's default filter.
    #[default]
    Inherit,
    /// No filtering at all.
    Any,
    Only(Vec<Namespace>),
}

impl NsFilter {
    fn effective(&self, default: &[Namespace]) -> Vec<Namespace> {
        match self {
            Self::Inherit => default.to_vec(),
            Self::Any => Vec::new(),
            Self::Only(namespaces) => namespaces.clone(),
        }
    }
}

/// A resolved collection. Literal inputs keep whatever shape the caller gave them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Titles {
    List(Vec<Title>),
    Set(HashSet<Title>),
}

impl Titles {
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Set(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, title: &str) -> bool {
        match self {
            Self::List(items) => items.iter().any(|item| item.as_str() == title),
            Self::Set(items) => items.contains(title),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Title> + '_> {
        match self {
            Self::List(items) => Box::new(items.iter()),
            Self::Set(items) => Box::new(items.iter()),
        }
    }

    pub fn into_set(self) -> HashSet<Title> {
        match self {
            Self::List(items) => items.into_iter().collect(),
            Self::Set(items) => items,
        }
    }

    pub fn into_vec(self) -> Vec<Title> {
        match self {
            Self::List(items) => items,
            Self::Set(items) => items.into_iter().collect(),
        }
    }
}

impl From<Vec<Title>> for Titles {
    fn from(value: Vec<Title>) -> Self {
        Self::List(value)
    }
}

impl From<HashSet<Title>> for Titles {
    fn from(value: HashSet<Title>) -> Self {
        Self::Set(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    Report { id: u32, namespaces: NsFilter },
    Category { title: Title, namespaces: NsFilter },
    Template { title: Title, namespaces: NsFilter },
    /// A User: or Wikipedia: page whose links list what to resolve.
    Config { title: Title, namespaces: NsFilter },
    Literal(Titles),
}

impl Specifier {
    pub fn report(id: u32) -> Self {
        Self::Report {
            id,
            namespaces: NsFilter::Inherit,
        }
    }

    /// Classify a page title by its namespace prefix.
    pub fn name(title: impl AsRef<str>) -> Result<Self, ResolveError> {
        Self::from_name(title, NsFilter::Inherit)
    }

    pub fn from_name(title: impl AsRef<str>, namespaces: NsFilter) -> Result<Self, ResolveError> {
        let title = Title::new(title);
        match title.namespace() {
            Namespace::Category => Ok(Self::Category { title, namespaces }),
            Namespace::Template => Ok(Self::Template { title, namespaces }),
            Namespace::User | Namespace::Project => Ok(Self::Config { title, namespaces }),
            _ => Err(ResolveError::InvalidSpecifier(title.into_string())),
        }
    }

    pub fn literal<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Title>,
    {
        Self::Literal(Titles::Set(items.into_iter().map(Into::into).collect()))
    }

    /// Replace this specifier's filter with exactly `namespaces`.
    pub fn only(self, namespaces: &[Namespace]) -> Self {
        self.with_filter(NsFilter::Only(namespaces.to_vec()))
    }

    pub fn unfiltered(self) -> Self {
        self.with_filter(NsFilter::Any)
    }

    fn with_filter(self, filter: NsFilter) -> Self {
        match self {
            Self::Report { id, .. } => Self::Report {
                id,
                namespaces: filter,
            },
            Self::Category { title, .. } => Self::Category {
                title,
                namespaces: filter,
            },
            Self::Template { title, .. } => Self::Template {
                title,
                namespaces: filter,
            },
            Self::Config { title, .. } => Self::Config {
                title,
                namespaces: filter,
            },
            literal @ Self::Literal(_) => literal,
        }
    }

    /// Parse the command-line form: a report id or a title, optionally followed by `@` and
    /// either `*` (no filter) or a comma-separated namespace list, e.g. `12@User talk` or
    /// `Category:X@File,User`.
    pub fn parse_cli(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (name, filter) = match raw.rsplit_once('@') {
            Some((name, "*")) => (name, NsFilter::Any),
            Some((name, list)) => {
                let namespaces = list
                    .split(',')
                    .map(Namespace::parse)
                    .collect::<Result<Vec<_>>>()?;
                (name, NsFilter::Only(namespaces))
            }
            None => (raw, NsFilter::Inherit),
        };

        if let Ok(id) = name.trim().parse::<u32>() {
            return Ok(Self::Report {
                id,
                namespaces: filter,
            });
        }
        Ok(Self::from_name(name, filter)?)
    }
}

pub struct Resolver<'a, W: WikiReadApi + ?Sized> {
    wiki: &'a mut W,
    reports: &'a mut dyn ReportSource,
    queries: &'a QueryCache,
}

impl<'a, W: WikiReadApi + ?Sized> Resolver<'a, W> {
    pub fn new(
        wiki: &'a mut W,
        reports: &'a mut dyn ReportSource,
        queries: &'a QueryCache,
    ) -> Self {
        Self {
            wiki,
            reports,
            queries,
        }
    }

    /// Resolve one specifier. An empty `default` disables filtering for bare specifiers.
    pub fn resolve(&mut self, specifier: Specifier, default: &[Namespace]) -> Result<Titles> {
        match specifier {
            Specifier::Literal(items) => Ok(items),
            Specifier::Report { id, namespaces } => {
                let namespaces = namespaces.effective(default);
                let prefix = namespaces.first().map(|ns| ns.prefix());
                let titles = self.reports.fetch_report(id, prefix.as_deref())?;
                Ok(Titles::Set(titles))
            }
            Specifier::Category { title, namespaces } => {
                let namespaces = namespaces.effective(default);
                let members = self
                    .queries
                    .category_members(&mut *self.wiki, &title, &namespaces)?;
                Ok(Titles::List(members))
            }
            Specifier::Template { title, namespaces } => {
                let namespaces = namespaces.effective(default);
                let pages = self
                    .queries
                    .what_transcludes_here(&mut *self.wiki, &title, &namespaces)?;
                Ok(Titles::List(pages))
            }
            Specifier::Config { title, namespaces } => {
                let namespaces = namespaces.effective(default);
                let mut visited = HashSet::new();
                self.resolve_config_page(&title, &namespaces, &mut visited)
                    .map(Titles::Set)
            }
        }
    }

    /// Union of every link on `page`. Categories and templates are expanded, links to other
    /// `User:` or `Wikipedia:` pages are resolved as config pages in turn, and any other link
    /// is kept as a literal title when it passes the filter. Each config page is read at most
    /// once per resolution, so cyclic references terminate.
    fn resolve_config_page(
        &mut self,
        page: &Title,
        namespaces: &[Namespace],
        visited: &mut HashSet<Title>,
    ) -> Result<HashSet<Title>> {
        if !visited.insert(page.clone()) {
            debug!("config page {page} already visited");
            return Ok(HashSet::new());
        }
        let links = self.wiki.links_on_page(page, &[])?;
        debug!("config page {} lists {} entries", page, links.len());

        let mut output = HashSet::new();
        for link in links {
            match link.namespace() {
                Namespace::Category => {
                    output.extend(
                        self.queries
                            .category_members(&mut *self.wiki, &link, namespaces)?,
                    );
                }
                Namespace::Template => {
                    output.extend(
                        self.queries
                            .what_transcludes_here(&mut *self.wiki, &link, namespaces)?,
                    );
                }
                Namespace::User | Namespace::Project => {
                    output.extend(self.resolve_config_page(&link, namespaces, visited)?);
                }
                _ if link.matches_filter(namespaces) => {
                    output.insert(link);
                }
                _ => {}
            }
        }
        Ok(output)
    }

    /// `resolve(first) - resolve(second) - ...` as a set.
    pub fn difference_of(
        &mut self,
        specifiers: Vec<Specifier>,
        default: &[Namespace],
    ) -> Result<HashSet<Title>> {
        let mut specifiers = specifiers.into_iter();
        let Some(first) = specifiers.next() else {
            return Err(ResolveError::EmptyDifference.into());
        };

        let mut running = self.resolve(first, default)?.into_set();
        for specifier in specifiers {
            for title in self.resolve(specifier, default)?.iter() {
                running.remove(title);
            }
        }
        Ok(running)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{DEFAULT_NAMESPACES, NsFilter, ResolveError, Resolver, Specifier, Titles};
    use crate::cache::MemoryCache;
    use crate::client::WikiReadApi;
    use crate::query::QueryCache;
    use crate::testing::{MockApi, MockReports, title_set, titles};
    use crate::title::{Namespace, Title};

    fn queries() -> QueryCache {
        QueryCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(600))
    }

    fn wiki() -> MockApi {
        MockApi::new()
            .with_category(
                "Category:X",
                &["File:A.png", "File:B.jpg", "User:Someone", "Talk:Thing"],
            )
            .with_transclusions("Template:Keep local", &["File:B.jpg", "File talk:B.jpg"])
            .with_links("User:Bot/Cfg", &["Category:X", "File:Direct.png"])
    }

    fn reports() -> MockReports {
        MockReports::default()
            .with(1, "A.png\nB.jpg\n")
            .with(9, "B.jpg\nC.svg\n")
            .with(20, "Some_user\n")
    }

    #[test]
    fn literal_collections_pass_through_unchanged() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let list = Titles::List(titles(&["File:Z.png", "File:Z.png"]));
        let resolved = resolver
            .resolve(Specifier::Literal(list.clone()), DEFAULT_NAMESPACES)
            .expect("literal");
        assert_eq!(resolved, list);
        assert_eq!(api.request_count(), 0);
        assert_eq!(reports.calls, 0);
    }

    #[test]
    fn difference_of_literal_reports() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let one = resolver
            .resolve(Specifier::report(1), DEFAULT_NAMESPACES)
            .expect("report 1");
        let nine = resolver
            .resolve(Specifier::report(9), DEFAULT_NAMESPACES)
            .expect("report 9");
        assert_eq!(one.clone().into_set(), title_set(&["File:A.png", "File:B.jpg"]));

        let result = resolver
            .difference_of(
                vec![Specifier::Literal(one), Specifier::Literal(nine)],
                DEFAULT_NAMESPACES,
            )
            .expect("difference");
        assert_eq!(result, title_set(&["File:A.png"]));
    }

    #[test]
    fn report_prefix_follows_first_namespace() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let users = resolver
            .resolve(
                Specifier::report(20).only(&[Namespace::UserTalk, Namespace::User]),
                DEFAULT_NAMESPACES,
            )
            .expect("user talk");
        assert_eq!(users.into_set(), title_set(&["User talk:Some user"]));

        let bare = resolver
            .resolve(Specifier::report(20).unfiltered(), DEFAULT_NAMESPACES)
            .expect("bare");
        assert_eq!(bare.into_set(), title_set(&["Some user"]));

        let main = resolver
            .resolve(Specifier::report(20).only(&[Namespace::Main]), DEFAULT_NAMESPACES)
            .expect("main");
        assert_eq!(main.into_set(), title_set(&["Some user"]));
    }

    #[test]
    fn config_page_unions_categories_and_literal_links() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let via_config = resolver
            .resolve(Specifier::name("User:Bot/Cfg").expect("spec"), DEFAULT_NAMESPACES)
            .expect("config");
        let category = resolver
            .resolve(Specifier::name("Category:X").expect("spec"), DEFAULT_NAMESPACES)
            .expect("category");

        let mut expected = category.into_set();
        expected.insert(Title::new("File:Direct.png"));
        assert_eq!(via_config.into_set(), expected);
        assert_eq!(
            expected,
            title_set(&["File:A.png", "File:B.jpg", "File:Direct.png"])
        );
    }

    #[test]
    fn missing_config_page_resolves_to_nothing() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let resolved = resolver
            .resolve(
                Specifier::name("Wikipedia:Nothing here").expect("spec"),
                DEFAULT_NAMESPACES,
            )
            .expect("config");
        assert!(resolved.is_empty());
    }

    #[test]
    fn nested_config_pages_are_followed() {
        let mut api = MockApi::new()
            .with_links("User:Bot/Outer", &["User:Bot/Inner", "File:Direct.png"])
            .with_links("User:Bot/Inner", &["Category:Y"])
            .with_category("Category:Y", &["File:Deep.png"]);
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let files = resolver
            .resolve(Specifier::name("User:Bot/Outer").expect("spec"), DEFAULT_NAMESPACES)
            .expect("nested")
            .into_set();
        assert_eq!(files, title_set(&["File:Direct.png", "File:Deep.png"]));

        let everything = resolver
            .resolve(
                Specifier::name("User:Bot/Outer").expect("spec").unfiltered(),
                DEFAULT_NAMESPACES,
            )
            .expect("unfiltered")
            .into_set();
        assert_eq!(everything, files);
    }

    #[test]
    fn cyclic_config_pages_terminate() {
        let mut api = MockApi::new()
            .with_links("User:Bot/A", &["Wikipedia:B", "File:From a.png"])
            .with_links("Wikipedia:B", &["User:Bot/A", "User:Bot/B", "File:From b.png"])
            .with_links("User:Bot/B", &["User:Bot/B"]);
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let resolved = resolver
            .resolve(Specifier::name("User:Bot/A").expect("spec"), DEFAULT_NAMESPACES)
            .expect("cycle")
            .into_set();
        drop(resolver);

        assert_eq!(resolved, title_set(&["File:From a.png", "File:From b.png"]));
        assert_eq!(api.request_count(), 3);
    }

    #[test]
    fn disabling_the_filter_yields_a_superset() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let files = resolver
            .resolve(Specifier::name("Category:X").expect("spec"), DEFAULT_NAMESPACES)
            .expect("files")
            .into_set();
        let all = resolver
            .resolve(
                Specifier::name("Category:X").expect("spec").unfiltered(),
                DEFAULT_NAMESPACES,
            )
            .expect("all")
            .into_set();
        let empty_default = resolver
            .resolve(Specifier::name("Category:X").expect("spec"), &[])
            .expect("empty default")
            .into_set();

        assert!(all.is_superset(&files));
        assert!(all.len() > files.len());
        assert_eq!(all, empty_default);
    }

    #[test]
    fn difference_matches_sequential_subtraction() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let specs = || {
            vec![
                Specifier::name("Category:X").expect("spec"),
                Specifier::report(9),
                Specifier::Literal(Titles::List(titles(&["File:Nope.png"]))),
            ]
        };
        let combined = resolver
            .difference_of(specs(), DEFAULT_NAMESPACES)
            .expect("difference");

        let mut expected: HashSet<Title> = HashSet::new();
        for (index, spec) in specs().into_iter().enumerate() {
            let resolved = resolver
                .resolve(spec, DEFAULT_NAMESPACES)
                .expect("resolve")
                .into_set();
            if index == 0 {
                expected = resolved;
            } else {
                expected = &expected - &resolved;
            }
        }
        assert_eq!(combined, expected);
        assert_eq!(combined, title_set(&["File:A.png"]));
    }

    #[test]
    fn single_specifier_difference_is_its_own_set() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let list = Titles::List(titles(&["File:A.png", "File:A.png", "File:B.png"]));
        let result = resolver
            .difference_of(vec![Specifier::Literal(list)], DEFAULT_NAMESPACES)
            .expect("difference");
        assert_eq!(result, title_set(&["File:A.png", "File:B.png"]));

        let err = resolver
            .difference_of(Vec::new(), DEFAULT_NAMESPACES)
            .expect_err("must fail");
        assert_eq!(
            err.downcast_ref::<ResolveError>(),
            Some(&ResolveError::EmptyDifference)
        );
    }

    #[test]
    fn later_failures_surface_after_the_set_is_empty() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        let err = resolver
            .difference_of(
                vec![
                    Specifier::Literal(Titles::List(Vec::new())),
                    Specifier::report(404),
                ],
                DEFAULT_NAMESPACES,
            )
            .expect_err("missing report must fail");
        assert!(err.to_string().contains("404"));
        drop(resolver);
        assert_eq!(reports.calls, 1);
    }

    #[test]
    fn repeated_resolution_uses_the_cache() {
        let mut api = wiki();
        let mut reports = reports();
        let queries = queries();
        let mut resolver = Resolver::new(&mut api, &mut reports, &queries);

        for _ in 0..2 {
            resolver
                .resolve(Specifier::name("Template:Keep local").expect("spec"), DEFAULT_NAMESPACES)
                .expect("template");
        }
        drop(resolver);
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn unknown_prefixes_fail_loudly() {
        assert_eq!(
            Specifier::name("File:Direct.png"),
            Err(ResolveError::InvalidSpecifier("File:Direct.png".to_string()))
        );
        assert!(Specifier::name("Plain article").is_err());
    }

    #[test]
    fn cli_specifiers_parse() {
        assert_eq!(
            Specifier::parse_cli("12").expect("report"),
            Specifier::report(12)
        );
        assert_eq!(
            Specifier::parse_cli("20@User talk").expect("report with ns"),
            Specifier::Report {
                id: 20,
                namespaces: NsFilter::Only(vec![Namespace::UserTalk]),
            }
        );
        assert_eq!(
            Specifier::parse_cli("Category:X@*").expect("unfiltered"),
            Specifier::Category {
                title: Title::new("Category:X"),
                namespaces: NsFilter::Any,
            }
        );
        assert_eq!(
            Specifier::parse_cli("Template:Keep_local@File,File talk").expect("template"),
            Specifier::Template {
                title: Title::new("Template:Keep local"),
                namespaces: NsFilter::Only(vec![Namespace::File, Namespace::FileTalk]),
            }
        );
        assert!(Specifier::parse_cli("Category:X@Bogus").is_err());
        assert!(Specifier::parse_cli("File:A.png").is_err());
    }
}
