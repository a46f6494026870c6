use anyhow::Result;
use tracing::{info, warn};

use crate::client::PageEdit;
use crate::resolve::Specifier;
use crate::tasks::{Task, TaskContext, sorted};
use crate::title::Title;

pub const BOTS_TEMPLATE: &str = "Template:Bots";
pub const DELETABLE_FILE: &str = "Template:Deletable file";

pub const BOT_TASKS: &[Task] = &[
    Task {
        id: 5,
        name: "find license conflicts",
        run: find_license_conflicts,
    },
    Task {
        id: 10,
        name: "flag orphaned free images",
        run: flag_orphaned_free_images,
    },
];

/// Config pages for bot tasks live under the bot's user page.
pub fn config_prefix(username: &str) -> String {
    format!("User:{}/Task/", username.trim())
}

/// Files labeled both free and non-free get `{{Wrong-license}}`.
pub fn find_license_conflicts(context: &mut TaskContext<'_>) -> Result<()> {
    let ignore = context.ignore_of(5)?;
    let targets = context.difference_of(vec![Specifier::report(2), ignore])?;
    edit_each(
        context,
        targets,
        &PageEdit::Prepend("{{Wrong-license}}\n".to_string()),
        "BOT: Marking conflict in copyright status",
    )
}

/// Free files with no inbound file usage get `{{Orphan image}}`.
pub fn flag_orphaned_free_images(context: &mut TaskContext<'_>) -> Result<()> {
    let ignore = context.ignore_of(10)?;
    let candidates = context.difference_of(vec![
        Specifier::report(3),
        Specifier::report(9),
        Specifier::name(BOTS_TEMPLATE)?,
        Specifier::name(DELETABLE_FILE)?,
        Specifier::report(4),
        ignore,
    ])?;
    let existing = context.exists_filter(&sorted(candidates), true)?;
    edit_each(
        context,
        existing,
        &PageEdit::Append("\n{{Orphan image}}".to_string()),
        "BOT: this file has no inbound file usage",
    )
}

/// Edit every title in turn. A rejected edit is logged and the rest still go out.
fn edit_each<I>(
    context: &mut TaskContext<'_>,
    titles: I,
    edit: &PageEdit,
    summary: &str,
) -> Result<()>
where
    I: IntoIterator<Item = Title>,
{
    let titles = sorted(titles);
    info!("{} pages to edit", titles.len());
    for title in titles {
        if let Err(error) = context.edit(&title, edit.clone(), summary) {
            warn!("could not edit {title}: {error:#}");
        }
    }
    Ok(())
}
