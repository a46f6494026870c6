use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, bail};

use crate::client::{PageEdit, WikiReadApi, WikiWriteApi};
use crate::report::{ReportSource, parse_report};
use crate::title::{Namespace, Title};

#[derive(Debug, Default)]
pub(crate) struct MockApi {
    pub(crate) domain: String,
    pub(crate) categories: BTreeMap<Title, Vec<Title>>,
    pub(crate) transclusions: BTreeMap<Title, Vec<Title>>,
    pub(crate) links: BTreeMap<Title, Vec<Title>>,
    pub(crate) existing: HashSet<Title>,
    pub(crate) page_categories: BTreeMap<Title, Vec<Title>>,
    pub(crate) page_templates: BTreeMap<Title, Vec<Title>>,
    pub(crate) backlinks: BTreeMap<Title, Vec<Title>>,
    pub(crate) texts: BTreeMap<Title, String>,
    pub(crate) edits: Vec<(Title, PageEdit, String)>,
    pub(crate) fail_edits_on: HashSet<Title>,
    pub(crate) logged_in: bool,
    pub(crate) request_count: usize,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self {
            domain: "en.wikipedia.org".to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn with_category(mut self, category: &str, members: &[&str]) -> Self {
        self.categories.insert(Title::new(category), titles(members));
        self
    }

    pub(crate) fn with_transclusions(mut self, template: &str, pages: &[&str]) -> Self {
        self.transclusions.insert(Title::new(template), titles(pages));
        self
    }

    pub(crate) fn with_links(mut self, page: &str, targets: &[&str]) -> Self {
        self.links.insert(Title::new(page), titles(targets));
        self
    }

    pub(crate) fn with_existing(mut self, pages: &[&str]) -> Self {
        self.existing.extend(titles(pages));
        self
    }

    pub(crate) fn with_page_categories(mut self, page: &str, categories: &[&str]) -> Self {
        self.page_categories.insert(Title::new(page), titles(categories));
        self
    }

    pub(crate) fn with_page_templates(mut self, page: &str, templates: &[&str]) -> Self {
        self.page_templates.insert(Title::new(page), titles(templates));
        self
    }

    pub(crate) fn with_backlinks(mut self, page: &str, sources: &[&str]) -> Self {
        self.backlinks.insert(Title::new(page), titles(sources));
        self
    }

    pub(crate) fn with_text(mut self, page: &str, text: &str) -> Self {
        self.texts.insert(Title::new(page), text.to_string());
        self
    }

    fn batch(
        &mut self,
        titles: &[Title],
        source: fn(&Self) -> &BTreeMap<Title, Vec<Title>>,
    ) -> HashMap<Title, Vec<Title>> {
        if !titles.is_empty() {
            self.request_count += 1;
        }
        titles
            .iter()
            .map(|title| {
                let values = source(self).get(title).cloned().unwrap_or_default();
                (title.clone(), values)
            })
            .collect()
    }

    fn filtered(source: Option<&Vec<Title>>, namespaces: &[Namespace]) -> Vec<Title> {
        source
            .map(|items| {
                items
                    .iter()
                    .filter(|title| title.matches_filter(namespaces))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl WikiReadApi for MockApi {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn category_members(
        &mut self,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        self.request_count += 1;
        Ok(Self::filtered(self.categories.get(title), namespaces))
    }

    fn what_transcludes_here(
        &mut self,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        self.request_count += 1;
        Ok(Self::filtered(self.transclusions.get(title), namespaces))
    }

    fn links_on_page(&mut self, title: &Title, namespaces: &[Namespace]) -> Result<Vec<Title>> {
        self.request_count += 1;
        Ok(Self::filtered(self.links.get(title), namespaces))
    }

    fn exists(&mut self, titles: &[Title]) -> Result<HashMap<Title, bool>> {
        self.request_count += 1;
        Ok(titles
            .iter()
            .map(|title| (title.clone(), self.existing.contains(title)))
            .collect())
    }

    fn categories_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        Ok(self.batch(titles, |api| &api.page_categories))
    }

    fn templates_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        Ok(self.batch(titles, |api| &api.page_templates))
    }

    fn what_links_here(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        Ok(self.batch(titles, |api| &api.backlinks))
    }

    fn page_text(&mut self, titles: &[Title]) -> Result<HashMap<Title, String>> {
        if !titles.is_empty() {
            self.request_count += 1;
        }
        Ok(titles
            .iter()
            .filter_map(|title| {
                self.texts
                    .get(title)
                    .map(|text| (title.clone(), text.clone()))
            })
            .collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MockApi {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.request_count += 1;
        self.logged_in = true;
        Ok(())
    }

    fn edit(&mut self, title: &Title, edit: &PageEdit, summary: &str) -> Result<()> {
        self.request_count += 1;
        if self.fail_edits_on.contains(title) {
            bail!("edit rejected for {title}");
        }
        self.edits
            .push((title.clone(), edit.clone(), summary.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockReports {
    pub(crate) bodies: HashMap<u32, String>,
    pub(crate) calls: usize,
}

impl MockReports {
    pub(crate) fn with(mut self, id: u32, body: &str) -> Self {
        self.bodies.insert(id, body.to_string());
        self
    }
}

impl ReportSource for MockReports {
    fn fetch_report(&mut self, id: u32, prefix: Option<&str>) -> Result<HashSet<Title>> {
        self.calls += 1;
        match self.bodies.get(&id) {
            Some(body) => Ok(parse_report(body, prefix)),
            None => bail!("failed to download report {id}: HTTP 404 Not Found"),
        }
    }
}

pub(crate) fn titles(items: &[&str]) -> Vec<Title> {
    items.iter().map(Title::new).collect()
}

pub(crate) fn title_set(items: &[&str]) -> HashSet<Title> {
    items.iter().map(Title::new).collect()
}
