use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use crate::bots::DELETABLE_FILE;
use crate::client::PageEdit;
use crate::query::exists_filter;
use crate::report::DEFAULT_REPORT_PREFIX;
use crate::resolve::{NsFilter, Specifier, Titles};
use crate::tasks::{Task, TaskContext, listify, sorted};
use crate::title::{Namespace, Title};

pub const DATABASE_REPORTS: &str = "Wikipedia:Database reports/";
pub const UPDATED_AT: &str =
    "This report updated at <onlyinclude>~~~~~</onlyinclude> {{Bots|deny=luckyrename}}\n";
pub const UPDATING_REPORT: &str = "BOT: Updating report";

const KEEP_LOCAL: &str = "Template:Keep local";
const DELETION_TEMPLATE_TAG: &str = "Template:Deletion template tag";
const FFD: &str = "Template:Ffd";
const FILES_FOR_DISCUSSION: &str = "Wikipedia:Files for discussion";

pub const REPORT_TASKS: &[Task] = &[
    Task {
        id: 1,
        name: "shadows commons page",
        run: shadows_commons_page,
    },
    Task {
        id: 2,
        name: "orphaned files for discussion",
        run: orphaned_files_for_discussion,
    },
    Task {
        id: 3,
        name: "all free license tags",
        run: all_free_license_tags,
    },
    Task {
        id: 4,
        name: "orphaned timed text",
        run: orphaned_timed_text,
    },
    Task {
        id: 5,
        name: "malformed SPI reports",
        run: malformed_spi_reports,
    },
    Task {
        id: 6,
        name: "orphaned keep local",
        run: orphaned_keep_local,
    },
    Task {
        id: 8,
        name: "oversized fair use files",
        run: oversized_fair_use_files,
    },
    Task {
        id: 9,
        name: "missing file copyright tags",
        run: missing_file_copyright_tags,
    },
    Task {
        id: 10,
        name: "duplicate on commons",
        run: duplicate_on_commons,
    },
    Task {
        id: 11,
        name: "low resolution free files",
        run: low_resolution_free_files,
    },
    Task {
        id: 12,
        name: "possibly unsourced files",
        run: possibly_unsourced_files,
    },
    Task {
        id: 14,
        name: "shadows commons non-free",
        run: shadows_commons_non_free,
    },
    Task {
        id: 15,
        name: "non-free PDFs",
        run: non_free_pdfs,
    },
    Task {
        id: 16,
        name: "orphaned file talk",
        run: orphaned_file_talk,
    },
    Task {
        id: 17,
        name: "orphaned PDFs",
        run: orphaned_pdfs,
    },
    Task {
        id: 18,
        name: "transcluded non-existent templates",
        run: transcluded_non_existent_templates,
    },
    Task {
        id: 19,
        name: "flickr files",
        run: flickr_files,
    },
    Task {
        id: 20,
        name: "large IP talk pages",
        run: large_ip_talk_pages,
    },
    Task {
        id: 21,
        name: "large user talk pages",
        run: large_user_talk_pages,
    },
    Task {
        id: 22,
        name: "multi-extension filenames",
        run: multi_ext_filenames,
    },
    Task {
        id: 23,
        name: "Getty files",
        run: getty_files,
    },
    Task {
        id: 24,
        name: "AP files",
        run: ap_files,
    },
    Task {
        id: 25,
        name: "unfiled RfAs",
        run: unfiled_rfas,
    },
    Task {
        id: 26,
        name: "fully protected user talk",
        run: fully_protected_user_talk,
    },
    Task {
        id: 27,
        name: "orphaned keep local with commons duplicate",
        run: orphaned_keep_local_with_commons_duplicate,
    },
];

fn publish(context: &mut TaskContext<'_>, subpage: &str, text: String) -> Result<()> {
    info!("generating report for '{subpage}'");
    context.edit(
        &Title::new(format!("{DATABASE_REPORTS}{subpage}")),
        PageEdit::Replace(text),
        UPDATING_REPORT,
    )
}

/// Replace `subpage` with a sorted bullet list of `titles` under the standard header.
fn simple_update<I>(
    context: &mut TaskContext<'_>,
    subpage: &str,
    titles: I,
    escape: bool,
) -> Result<()>
where
    I: IntoIterator<Item = Title>,
{
    let text = listify(sorted(titles), escape, UPDATED_AT);
    publish(context, subpage, text)
}

fn dump_with_template<I>(
    context: &mut TaskContext<'_>,
    subpage: &str,
    template: &str,
    titles: I,
) -> Result<()>
where
    I: IntoIterator<Item = Title>,
{
    let body = sorted(titles)
        .iter()
        .map(|title| format!("* {{{{{template}|{title}}}}}"))
        .collect::<Vec<_>>()
        .join("\n");
    publish(context, subpage, format!("{UPDATED_AT}{body}"))
}

fn dump_no_redirect<I>(context: &mut TaskContext<'_>, subpage: &str, titles: I) -> Result<()>
where
    I: IntoIterator<Item = Title>,
{
    dump_with_template(context, subpage, "No redirect", titles)
}

fn dump_file_report(context: &mut TaskContext<'_>, subpage: &str, id: u32) -> Result<()> {
    let titles = context.fetch_report(id, Some(DEFAULT_REPORT_PREFIX))?;
    simple_update(context, subpage, titles, true)
}

/// Links on the ignore page of `subpage`, taken as plain titles.
fn contents_of_ignore(context: &mut TaskContext<'_>, subpage: &str) -> Result<Vec<Title>> {
    let page = context.config_of(subpage, "Ignore")?;
    context.links_on_page(&page)
}

fn keep_local_files(context: &mut TaskContext<'_>) -> Result<HashSet<Title>> {
    Ok(context
        .transclusions(KEEP_LOCAL, &[Namespace::File])?
        .into_iter()
        .collect())
}

/// Report 1
pub fn shadows_commons_page(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "File description pages shadowing a Commons file or redirect";
    let ignore = context.ignore_of(subpage)?;
    let titles = context.difference_of(vec![Specifier::report(11), ignore])?;
    dump_no_redirect(context, subpage, titles)
}

/// Report 2
pub fn orphaned_files_for_discussion(context: &mut TaskContext<'_>) -> Result<()> {
    let tagged = context.transclusions(FFD, &[Namespace::File])?;
    let nomination_subpages = format!("{FILES_FOR_DISCUSSION}/");
    let titles = context
        .what_links_here(&tagged)?
        .into_iter()
        .filter(|(_, sources)| {
            !sources.iter().any(|source| {
                source.as_str() == FILES_FOR_DISCUSSION
                    || source.as_str().starts_with(&nomination_subpages)
            })
        })
        .map(|(title, _)| title)
        .collect::<Vec<_>>();
    simple_update(
        context,
        "Files tagged for FfD missing an FfD nomination",
        titles,
        true,
    )
}

/// Report 3. Also lists the tags that are missing on Commons.
pub fn all_free_license_tags(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "All free license tags";
    let sources = context.config_of(subpage, "Sources")?;

    let mut tags = HashSet::new();
    for category in context.links_on_page(&sources)? {
        if !category.is_in(Namespace::Category) {
            continue;
        }
        tags.extend(
            context
                .category_members(&category, &[Namespace::Template])?
                .into_iter()
                .filter(|title| !title.as_str().ends_with("/sandbox")),
        );
    }

    let ignored = contents_of_ignore(context, subpage)?;
    let tags = context.difference_of(vec![
        Specifier::Literal(Titles::Set(tags)),
        Specifier::Literal(Titles::List(ignored)),
    ])?;
    let tags = sorted(tags);
    simple_update(context, subpage, tags.clone(), false)?;

    let missing = exists_filter(context.commons()?, &tags, false)?;
    simple_update(
        context,
        "Free license tags which do not exist on Commons",
        missing,
        false,
    )
}

/// Report 4
pub fn orphaned_timed_text(context: &mut TaskContext<'_>) -> Result<()> {
    let titles = context.fetch_report(19, Some(Namespace::TimedText.prefix().as_str()))?;
    dump_no_redirect(context, "Timed Text without a corresponding File", titles)
}

/// Report 5. Every listed case gets a null edit first; pages whose link tables were merely
/// stale drop out of the report on the next run.
pub fn malformed_spi_reports(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Malformed SPI Cases";
    let project = NsFilter::Only(vec![Namespace::Project]);
    let ignored = contents_of_ignore(context, subpage)?;
    let candidates = context.difference_of(vec![
        Specifier::Report {
            id: 17,
            namespaces: project.clone(),
        },
        Specifier::from_name("Template:SPI case status", project.clone())?,
        Specifier::from_name("Template:SPI archive notice", project)?,
        Specifier::Literal(Titles::List(ignored)),
    ])?;
    let cases = sorted(context.exists_filter(&sorted(candidates), true)?);

    let texts = context.page_text(&cases)?;
    for title in &cases {
        let Some(text) = texts.get(title) else {
            continue;
        };
        if let Err(error) = context.edit(title, PageEdit::Replace(text.clone()), "null edit") {
            debug!("null edit of {title} failed: {error:#}");
        }
    }

    let header = format!("{{{{/Header}}}}\n{UPDATED_AT}");
    publish(context, subpage, listify(cases, false, &header))
}

/// Report 6
pub fn orphaned_keep_local(context: &mut TaskContext<'_>) -> Result<()> {
    let orphans = context.fetch_report(9, Some(DEFAULT_REPORT_PREFIX))?;
    let keep_local = keep_local_files(context)?;
    let titles = orphans.intersection(&keep_local).cloned().collect::<Vec<_>>();
    simple_update(context, "Orphaned free files tagged keep local", titles, true)
}

/// Report 8
pub fn oversized_fair_use_files(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Large fair-use images";
    let ignore = context.ignore_of(subpage)?;
    let titles = context.difference_of(vec![
        Specifier::report(7),
        Specifier::name(DELETABLE_FILE)?,
        ignore,
    ])?;
    simple_update(context, subpage, titles, true)
}

/// Report 9. Categorized files only, and none in an allowed category.
pub fn missing_file_copyright_tags(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Files without a license tag";
    let allow_page = context.config_of(subpage, "Allow")?;
    let allowed = context
        .links_on_page(&allow_page)?
        .into_iter()
        .collect::<HashSet<_>>();
    let ignore = context.ignore_of(subpage)?;
    let candidates = context.difference_of(vec![
        Specifier::report(8),
        Specifier::report(5),
        Specifier::report(6),
        Specifier::name(DELETABLE_FILE)?,
        ignore,
    ])?;
    let titles = context
        .categories_on_page(&sorted(candidates))?
        .into_iter()
        .filter(|(_, categories)| {
            !categories.is_empty() && !categories.iter().any(|category| allowed.contains(category))
        })
        .map(|(title, _)| title)
        .collect::<Vec<_>>();
    simple_update(context, subpage, titles, true)
}

/// Report 10
pub fn duplicate_on_commons(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Local files with a duplicate on Commons";
    let queries = context.queries().clone();
    let nominated = queries.what_transcludes_here(
        context.commons()?,
        &Title::new(DELETION_TEMPLATE_TAG),
        &[Namespace::File],
    )?;
    let ignore = context.ignore_of(subpage)?;
    let titles = context.difference_of(vec![
        Specifier::report(1),
        Specifier::name(DELETABLE_FILE)?,
        Specifier::Literal(Titles::List(nominated)),
        ignore,
    ])?;
    simple_update(context, subpage, titles, true)
}

/// Report 11
pub fn low_resolution_free_files(context: &mut TaskContext<'_>) -> Result<()> {
    let titles = context.difference_of(vec![
        Specifier::report(10),
        Specifier::name("Category:Wikipedia images available as SVG")?,
        Specifier::name("Category:All files proposed for deletion")?,
    ])?;
    simple_update(context, "Orphaned low-resolution free files", titles, true)
}

/// Report 12
pub fn possibly_unsourced_files(context: &mut TaskContext<'_>) -> Result<()> {
    dump_file_report(context, "Free files without a machine-readable source", 12)
}

/// Report 14
pub fn shadows_commons_non_free(context: &mut TaskContext<'_>) -> Result<()> {
    let shadows = context.fetch_report(13, Some(DEFAULT_REPORT_PREFIX))?;
    let non_free = context.fetch_report(5, Some(DEFAULT_REPORT_PREFIX))?;
    let titles = shadows.intersection(&non_free).cloned().collect::<Vec<_>>();
    dump_with_template(
        context,
        "Non-free files shadowing a Commons file",
        "/Template",
        titles,
    )
}

/// Report 15
pub fn non_free_pdfs(context: &mut TaskContext<'_>) -> Result<()> {
    dump_file_report(context, "Non-free PDFs", 15)
}

/// Report 16
pub fn orphaned_file_talk(context: &mut TaskContext<'_>) -> Result<()> {
    let talk = NsFilter::Only(vec![Namespace::FileTalk]);
    let titles = context.difference_of(vec![
        Specifier::Report {
            id: 16,
            namespaces: talk.clone(),
        },
        Specifier::from_name(
            "Category:Wikipedia orphaned talk pages that should not be speedily deleted",
            talk,
        )?,
    ])?;
    simple_update(context, "Orphaned file talk pages", titles, false)
}

/// Report 17
pub fn orphaned_pdfs(context: &mut TaskContext<'_>) -> Result<()> {
    let titles = context
        .fetch_report(9, Some(DEFAULT_REPORT_PREFIX))?
        .into_iter()
        .filter(|title| title.as_str().to_lowercase().ends_with(".pdf"))
        .collect::<Vec<_>>();
    simple_update(context, "Orphaned PDFs", titles, true)
}

/// Report 18
pub fn transcluded_non_existent_templates(context: &mut TaskContext<'_>) -> Result<()> {
    let titles = context
        .fetch_report(14, Some(Namespace::Template.prefix().as_str()))?
        .into_iter()
        .map(|title| Title::new(format!("Special:WhatLinksHere/{title}")))
        .collect::<Vec<_>>();
    simple_update(context, "Transclusions of non-existent templates", titles, false)
}

/// Report 19
pub fn flickr_files(context: &mut TaskContext<'_>) -> Result<()> {
    let titles =
        context.difference_of(vec![Specifier::report(18), Specifier::name(KEEP_LOCAL)?])?;
    simple_update(context, "Free files which link to Flickr", titles, true)
}

fn user_talk_report(context: &mut TaskContext<'_>, subpage: &str, id: u32) -> Result<()> {
    let titles = context.fetch_report(id, Some(Namespace::UserTalk.prefix().as_str()))?;
    simple_update(context, subpage, titles, false)
}

/// Report 20
pub fn large_ip_talk_pages(context: &mut TaskContext<'_>) -> Result<()> {
    user_talk_report(context, "Unusually large IP talk pages", 20)
}

/// Report 21
pub fn large_user_talk_pages(context: &mut TaskContext<'_>) -> Result<()> {
    user_talk_report(context, "Unusually large user talk pages", 21)
}

/// Report 22
pub fn multi_ext_filenames(context: &mut TaskContext<'_>) -> Result<()> {
    dump_file_report(context, "Filenames with multiple extensions", 22)
}

/// Report 23
pub fn getty_files(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Files credited to Getty Images";
    let ignored = contents_of_ignore(context, subpage)?
        .into_iter()
        .collect::<HashSet<_>>();
    let credited = sorted(context.fetch_report(23, Some(DEFAULT_REPORT_PREFIX))?);
    let titles = context
        .templates_on_page(&credited)?
        .into_iter()
        .filter(|(_, templates)| !templates.iter().any(|template| ignored.contains(template)))
        .map(|(title, _)| title)
        .collect::<Vec<_>>();
    simple_update(context, subpage, titles, true)
}

/// Report 24
pub fn ap_files(context: &mut TaskContext<'_>) -> Result<()> {
    dump_file_report(context, "Files credited to The Associated Press", 24)
}

/// Report 25
pub fn unfiled_rfas(context: &mut TaskContext<'_>) -> Result<()> {
    let subpage = "Unfiled RfAs";
    let ignored = contents_of_ignore(context, subpage)?
        .into_iter()
        .filter(|title| title.is_in(Namespace::Project))
        .collect::<Vec<_>>();
    let titles = context.difference_of(vec![
        Specifier::report(25).only(&[Namespace::Project]),
        Specifier::Literal(Titles::List(ignored)),
    ])?;
    simple_update(context, subpage, titles, true)
}

/// Report 26
pub fn fully_protected_user_talk(context: &mut TaskContext<'_>) -> Result<()> {
    user_talk_report(context, "Fully protected user talk pages", 26)
}

/// Report 27
pub fn orphaned_keep_local_with_commons_duplicate(context: &mut TaskContext<'_>) -> Result<()> {
    let shadows = context.fetch_report(1, Some(DEFAULT_REPORT_PREFIX))?;
    let orphans = context.fetch_report(9, Some(DEFAULT_REPORT_PREFIX))?;
    let keep_local = keep_local_files(context)?;
    let titles = shadows
        .into_iter()
        .filter(|title| orphans.contains(title) && keep_local.contains(title))
        .collect::<Vec<_>>();
    simple_update(
        context,
        "Orphaned files copied to Commons tagged keep local",
        titles,
        true,
    )
}
