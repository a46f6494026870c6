use std::borrow::Borrow;
use std::fmt;

use anyhow::{Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Main,
    Talk,
    User,
    UserTalk,
    Project,
    ProjectTalk,
    File,
    FileTalk,
    MediaWiki,
    MediaWikiTalk,
    Template,
    TemplateTalk,
    Help,
    HelpTalk,
    Category,
    CategoryTalk,
    Portal,
    PortalTalk,
    Draft,
    DraftTalk,
    TimedText,
    TimedTextTalk,
    Module,
    ModuleTalk,
}

const ALL_NAMESPACES: &[Namespace] = &[
    Namespace::Main,
    Namespace::Talk,
    Namespace::User,
    Namespace::UserTalk,
    Namespace::Project,
    Namespace::ProjectTalk,
    Namespace::File,
    Namespace::FileTalk,
    Namespace::MediaWiki,
    Namespace::MediaWikiTalk,
    Namespace::Template,
    Namespace::TemplateTalk,
    Namespace::Help,
    Namespace::HelpTalk,
    Namespace::Category,
    Namespace::CategoryTalk,
    Namespace::Portal,
    Namespace::PortalTalk,
    Namespace::Draft,
    Namespace::DraftTalk,
    Namespace::TimedText,
    Namespace::TimedTextTalk,
    Namespace::Module,
    Namespace::ModuleTalk,
];

impl Namespace {
    pub fn all() -> &'static [Namespace] {
        ALL_NAMESPACES
    }

    pub fn id(self) -> i32 {
        match self {
            Self::Main => 0,
            Self::Talk => 1,
            Self::User => 2,
            Self::UserTalk => 3,
            Self::Project => 4,
            Self::ProjectTalk => 5,
            Self::File => 6,
            Self::FileTalk => 7,
            Self::MediaWiki => 8,
            Self::MediaWikiTalk => 9,
            Self::Template => 10,
            Self::TemplateTalk => 11,
            Self::Help => 12,
            Self::HelpTalk => 13,
            Self::Category => 14,
            Self::CategoryTalk => 15,
            Self::Portal => 100,
            Self::PortalTalk => 101,
            Self::Draft => 118,
            Self::DraftTalk => 119,
            Self::TimedText => 710,
            Self::TimedTextTalk => 711,
            Self::Module => 828,
            Self::ModuleTalk => 829,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        ALL_NAMESPACES.iter().copied().find(|ns| ns.id() == id)
    }

    /// Canonical name as used in cache keys and on the CLI. The main namespace is `Main`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::Talk => "Talk",
            Self::User => "User",
            Self::UserTalk => "User talk",
            Self::Project => "Wikipedia",
            Self::ProjectTalk => "Wikipedia talk",
            Self::File => "File",
            Self::FileTalk => "File talk",
            Self::MediaWiki => "MediaWiki",
            Self::MediaWikiTalk => "MediaWiki talk",
            Self::Template => "Template",
            Self::TemplateTalk => "Template talk",
            Self::Help => "Help",
            Self::HelpTalk => "Help talk",
            Self::Category => "Category",
            Self::CategoryTalk => "Category talk",
            Self::Portal => "Portal",
            Self::PortalTalk => "Portal talk",
            Self::Draft => "Draft",
            Self::DraftTalk => "Draft talk",
            Self::TimedText => "TimedText",
            Self::TimedTextTalk => "TimedText talk",
            Self::Module => "Module",
            Self::ModuleTalk => "Module talk",
        }
    }

    /// Title prefix including the trailing colon; empty for the main namespace.
    pub fn prefix(self) -> String {
        match self {
            Self::Main => String::new(),
            other => format!("{}:", other.as_str()),
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Project => &["Project", "WP"],
            Self::ProjectTalk => &["Project talk", "WT"],
            Self::File => &["Image"],
            Self::FileTalk => &["Image talk"],
            _ => &[],
        }
    }

    /// Resolve a namespace name or alias (case-insensitive, `_` treated as a space).
    pub fn parse(value: &str) -> Result<Self> {
        let wanted = value.trim().replace('_', " ");
        if wanted.is_empty() || wanted.eq_ignore_ascii_case("main") || wanted == "(Main)" {
            return Ok(Self::Main);
        }
        let found = ALL_NAMESPACES.iter().copied().find(|ns| {
            ns.as_str().eq_ignore_ascii_case(&wanted)
                || ns
                    .aliases()
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(&wanted))
        });
        match found {
            Some(namespace) => Ok(namespace),
            None => bail!("unknown namespace: {value}"),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        ALL_NAMESPACES.iter().copied().find(|ns| {
            *ns != Self::Main && (ns.as_str() == prefix || ns.aliases().contains(&prefix))
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized wiki page title. Underscores become spaces; no case folding is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Title(String);

impl Title {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_title(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn namespace(&self) -> Namespace {
        self.split().0
    }

    /// The title without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.split().1
    }

    pub fn is_in(&self, namespace: Namespace) -> bool {
        self.namespace() == namespace
    }

    /// `true` when `namespaces` is empty (no filter) or contains this title's namespace.
    pub fn matches_filter(&self, namespaces: &[Namespace]) -> bool {
        namespaces.is_empty() || namespaces.contains(&self.namespace())
    }

    /// Re-home the local name of this title under another namespace.
    pub fn with_namespace(&self, namespace: Namespace) -> Self {
        Self(format!("{}{}", namespace.prefix(), self.local_name()))
    }

    fn split(&self) -> (Namespace, &str) {
        if let Some((prefix, rest)) = self.0.split_once(':')
            && let Some(namespace) = Namespace::from_prefix(prefix.trim_end())
        {
            return (namespace, rest.trim_start());
        }
        (Namespace::Main, &self.0)
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Title {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Title {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Title {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Title {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

pub fn normalize_title(raw: &str) -> String {
    raw.replace('_', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{Namespace, Title};

    #[test]
    fn title_normalizes_underscores() {
        let title = Title::new("File:Some_image_name.png");
        assert_eq!(title.as_str(), "File:Some image name.png");
        assert_eq!(title, Title::new("File:Some image name.png"));

        let set = HashSet::from([Title::new("A_B"), Title::new("A B")]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("A B"));
    }

    #[test]
    fn title_does_not_case_fold() {
        assert_ne!(Title::new("File:a.png"), Title::new("File:A.png"));
    }

    #[test]
    fn title_splits_namespace_and_local_name() {
        let title = Title::new("User talk:Example/Sandbox");
        assert_eq!(title.namespace(), Namespace::UserTalk);
        assert_eq!(title.local_name(), "Example/Sandbox");

        let project = Title::new("Wikipedia:Database reports/Foo");
        assert_eq!(project.namespace(), Namespace::Project);

        let main = Title::new("Star Wars: Episode IV");
        assert_eq!(main.namespace(), Namespace::Main);
        assert_eq!(main.local_name(), "Star Wars: Episode IV");
    }

    #[test]
    fn aliases_map_to_canonical_namespace() {
        assert_eq!(Title::new("Image:Foo.jpg").namespace(), Namespace::File);
        assert_eq!(Title::new("WP:AN").namespace(), Namespace::Project);
        assert_eq!(Namespace::parse("user_talk").expect("parse"), Namespace::UserTalk);
        assert_eq!(Namespace::parse("main").expect("parse"), Namespace::Main);
        assert!(Namespace::parse("Nope").is_err());
    }

    #[test]
    fn prefix_round_trips_through_id() {
        for ns in Namespace::all() {
            assert_eq!(Namespace::from_id(ns.id()), Some(*ns));
        }
        assert_eq!(Namespace::Main.prefix(), "");
        assert_eq!(Namespace::File.prefix(), "File:");
    }

    #[test]
    fn filter_matching_and_rehoming() {
        let title = Title::new("File:Foo.png");
        assert!(title.matches_filter(&[]));
        assert!(title.matches_filter(&[Namespace::User, Namespace::File]));
        assert!(!title.matches_filter(&[Namespace::User]));
        assert_eq!(
            title.with_namespace(Namespace::FileTalk).as_str(),
            "File talk:Foo.png"
        );
    }
}
