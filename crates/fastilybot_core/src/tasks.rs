use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::client::{PageEdit, WikiReadApi, WikiWriteApi};
use crate::query::{QueryCache, exists_filter};
use crate::report::ReportSource;
use crate::resolve::{DEFAULT_NAMESPACES, Resolver, Specifier, Titles};
use crate::title::{Namespace, Title};

pub type WikiFactory<'a> = Box<dyn FnMut() -> Result<Box<dyn WikiReadApi>> + 'a>;

/// Everything a bot or report task needs: the wiki it edits, a lazily opened read-only
/// Commons client, the remote report source and the query cache.
pub struct TaskContext<'a> {
    wiki: &'a mut (dyn WikiWriteApi + 'a),
    reports: &'a mut (dyn ReportSource + 'a),
    queries: QueryCache,
    commons: Option<Box<dyn WikiReadApi>>,
    commons_factory: WikiFactory<'a>,
    config_prefix: Option<String>,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        wiki: &'a mut (dyn WikiWriteApi + 'a),
        reports: &'a mut (dyn ReportSource + 'a),
        queries: QueryCache,
        commons_factory: WikiFactory<'a>,
    ) -> Self {
        Self {
            wiki,
            reports,
            queries,
            commons: None,
            commons_factory,
            config_prefix: None,
        }
    }

    pub fn set_config_prefix(&mut self, prefix: Option<String>) {
        self.config_prefix = prefix;
    }

    pub fn config_prefix(&self) -> Option<&str> {
        self.config_prefix.as_deref()
    }

    pub fn queries(&self) -> &QueryCache {
        &self.queries
    }

    pub fn wiki(&mut self) -> &mut (dyn WikiWriteApi + 'a) {
        &mut *self.wiki
    }

    /// The Commons client, created on first use.
    pub fn commons(&mut self) -> Result<&mut dyn WikiReadApi> {
        if self.commons.is_none() {
            let client = (self.commons_factory)()?;
            self.commons = Some(client);
        }
        match self.commons.as_deref_mut() {
            Some(client) => Ok(client),
            None => bail!("Commons client is unavailable"),
        }
    }

    pub fn resolver(&mut self) -> Resolver<'_, dyn WikiWriteApi + 'a> {
        Resolver::new(&mut *self.wiki, &mut *self.reports, &self.queries)
    }

    pub fn resolve(&mut self, specifier: Specifier) -> Result<Titles> {
        self.resolver().resolve(specifier, DEFAULT_NAMESPACES)
    }

    pub fn difference_of(&mut self, specifiers: Vec<Specifier>) -> Result<HashSet<Title>> {
        self.resolver().difference_of(specifiers, DEFAULT_NAMESPACES)
    }

    pub fn fetch_report(&mut self, id: u32, prefix: Option<&str>) -> Result<HashSet<Title>> {
        self.reports.fetch_report(id, prefix)
    }

    pub fn transclusions(
        &mut self,
        template: &str,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        self.queries
            .what_transcludes_here(&mut *self.wiki, &Title::new(template), namespaces)
    }

    pub fn category_members(
        &mut self,
        category: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        self.queries
            .category_members(&mut *self.wiki, category, namespaces)
    }

    pub fn links_on_page(&mut self, title: &Title) -> Result<Vec<Title>> {
        self.wiki.links_on_page(title, &[])
    }

    pub fn exists_filter(&mut self, titles: &[Title], existent: bool) -> Result<HashSet<Title>> {
        exists_filter(&mut *self.wiki, titles, existent)
    }

    pub fn categories_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.wiki.categories_on_page(titles)
    }

    pub fn templates_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.wiki.templates_on_page(titles)
    }

    pub fn what_links_here(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.wiki.what_links_here(titles)
    }

    pub fn page_text(&mut self, titles: &[Title]) -> Result<HashMap<Title, String>> {
        self.wiki.page_text(titles)
    }

    /// `<config prefix><sub_title>/<suffix>`
    pub fn config_of(&self, sub_title: impl Display, suffix: &str) -> Result<Title> {
        match self.config_prefix.as_deref() {
            Some(prefix) => Ok(Title::new(format!("{prefix}{sub_title}/{suffix}"))),
            None => {
                bail!("no config prefix is set, cannot locate the {suffix} page of {sub_title}")
            }
        }
    }

    pub fn ignore_of(&self, sub_title: impl Display) -> Result<Specifier> {
        let page = self.config_of(sub_title, "Ignore")?;
        Ok(Specifier::name(page.as_str())?)
    }

    /// Non-category members of `category` and all its subcategories. Category loops are
    /// visited once.
    pub fn category_members_recursive(&mut self, category: &Title) -> Result<HashSet<Title>> {
        let mut queue = VecDeque::from([category.clone()]);
        let mut visited = HashSet::new();
        let mut output = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for member in self.category_members(&current, &[])? {
                if member.is_in(Namespace::Category) {
                    queue.push_back(member);
                } else {
                    output.insert(member);
                }
            }
        }
        Ok(output)
    }

    pub fn edit(&mut self, title: &Title, edit: PageEdit, summary: &str) -> Result<()> {
        self.wiki.edit(title, &edit, summary)
    }
}

/// Render titles as a wikitext bullet list. Escaped links get a leading `:` so files and
/// categories are linked rather than embedded.
pub fn listify<I, T>(titles: I, escape: bool, header: &str) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    let colon = if escape { ":" } else { "" };
    let body = titles
        .into_iter()
        .map(|title| format!("*[[{colon}{title}]]"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{header}{body}")
}

pub fn sorted<I: IntoIterator<Item = Title>>(titles: I) -> Vec<Title> {
    let mut output = titles.into_iter().collect::<Vec<_>>();
    output.sort();
    output
}

pub type TaskFn = fn(&mut TaskContext<'_>) -> Result<()>;

#[derive(Clone, Copy)]
pub struct Task {
    pub id: u32,
    pub name: &'static str,
    pub run: TaskFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Bot,
    Report,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Report => "report",
        }
    }

    pub fn catalogue(self) -> &'static [Task] {
        match self {
            Self::Bot => crate::bots::BOT_TASKS,
            Self::Report => crate::reports::REPORT_TASKS,
        }
    }

    pub fn lookup(self, id: u32) -> Option<&'static Task> {
        self.catalogue().iter().find(|task| task.id == id)
    }

    pub fn all_ids(self) -> Vec<u32> {
        self.catalogue().iter().map(|task| task.id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<u32>,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
}

/// Run `ids` one after another. Unknown ids are skipped and failures are logged, neither stops
/// the run.
pub fn run_tasks(
    context: &mut TaskContext<'_>,
    kind: TaskKind,
    ids: &[u32],
    config_prefix: Option<String>,
) -> RunSummary {
    context.set_config_prefix(config_prefix);
    let mut summary = RunSummary::default();

    for &id in ids {
        let Some(task) = kind.lookup(id) else {
            warn!("no such {} task ({id}), skipping", kind.as_str());
            summary.skipped.push(id);
            continue;
        };

        info!("running {} task {} ({})", kind.as_str(), task.id, task.name);
        match (task.run)(context) {
            Ok(()) => summary.succeeded.push(id),
            Err(error) => {
                warn!(
                    "{} task {} ({}) failed: {error:#}",
                    kind.as_str(),
                    task.id,
                    task.name
                );
                summary.failed.push(id);
            }
        }
    }
    summary
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{TaskContext, WikiFactory};
    use crate::cache::MemoryCache;
    use crate::client::WikiReadApi;
    use crate::query::QueryCache;
    use crate::testing::{MockApi, MockReports};

    pub(crate) fn context<'a>(
        wiki: &'a mut MockApi,
        reports: &'a mut MockReports,
        commons: fn() -> MockApi,
    ) -> TaskContext<'a> {
        let factory: WikiFactory<'a> = Box::new(move || {
            let client: Box<dyn WikiReadApi> = Box::new(commons());
            Ok::<_, anyhow::Error>(client)
        });
        TaskContext::new(
            wiki,
            reports,
            QueryCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(600)),
            factory,
        )
    }

    pub(crate) fn no_commons() -> MockApi {
        let mut api = MockApi::new();
        api.domain = "commons.wikimedia.org".to_string();
        api
    }
}
