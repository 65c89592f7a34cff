// src/core/signatures.rs

//! Read-only signature tables consumed by the analyzer chain.
//!
//! The scanner ships with built-in tables for technologies, WAFs and
//! subdomain-takeover fingerprints. An external loader can hand in its own
//! lists through [`SignatureStore::new`]; the store is built once, before a
//! run, and only ever shared immutably afterwards.

use serde::{Deserialize, Serialize};

/// How a signature recognises a response. Every comparison is a
/// case-insensitive substring match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Header `key` present and containing `value` (an empty value only
    /// requires the header to exist).
    Header { key: String, value: String },
    Title(String),
    Body(String),
    /// `<meta name="...">` whose `content` contains `value`.
    Meta { name: String, value: String },
}

/// A named rule set. The first matching rule is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub rules: Vec<MatchRule>,
}

/// The three signature lists, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct SignatureStore {
    pub fingerprints: Vec<Signature>,
    pub wafs: Vec<Signature>,
    pub takeovers: Vec<Signature>,
}

impl SignatureStore {
    pub fn new(fingerprints: Vec<Signature>, wafs: Vec<Signature>, takeovers: Vec<Signature>) -> Self {
        Self { fingerprints, wafs, takeovers }
    }

    /// The tables compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            fingerprints: build(FINGERPRINTS),
            wafs: build(WAFS),
            takeovers: build(TAKEOVERS),
        }
    }
}

// --- Static tables ---

/// Compact static form of a rule, expanded into [`MatchRule`] at load time.
enum Rule {
    Header(&'static str, &'static str),
    Title(&'static str),
    Body(&'static str),
    Meta(&'static str, &'static str),
}

type Table = &'static [(&'static str, &'static [Rule])];

fn build(table: Table) -> Vec<Signature> {
    table
        .iter()
        .map(|(name, rules)| Signature {
            name: name.to_string(),
            rules: rules
                .iter()
                .map(|rule| match rule {
                    Rule::Header(key, value) => MatchRule::Header {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                    Rule::Title(s) => MatchRule::Title(s.to_string()),
                    Rule::Body(s) => MatchRule::Body(s.to_string()),
                    Rule::Meta(name, value) => MatchRule::Meta {
                        name: name.to_string(),
                        value: value.to_string(),
                    },
                })
                .collect(),
        })
        .collect()
}

static FINGERPRINTS: Table = &[
    // --- Web servers & platforms ---
    ("Nginx", &[Rule::Header("server", "nginx"), Rule::Body("<hr><center>nginx</center>")]),
    ("Apache", &[Rule::Header("server", "apache"), Rule::Body("Apache Server at")]),
    ("LiteSpeed", &[Rule::Header("server", "litespeed")]),
    ("Microsoft IIS", &[Rule::Header("server", "microsoft-iis")]),
    ("Cloudflare", &[Rule::Header("server", "cloudflare")]),
    // --- CMS & e-commerce ---
    (
        "WordPress",
        &[
            Rule::Meta("generator", "wordpress"),
            Rule::Title("wordpress"),
            Rule::Body("/wp-content/"),
            Rule::Body("/wp-includes/"),
        ],
    ),
    ("Joomla", &[Rule::Meta("generator", "joomla")]),
    ("Drupal", &[Rule::Header("x-generator", "drupal"), Rule::Meta("generator", "drupal")]),
    ("Shopify", &[Rule::Header("x-shopid", ""), Rule::Body("cdn.shopify.com")]),
    ("Magento", &[Rule::Header("set-cookie", "mage-"), Rule::Body("Mage.Cookies")]),
    // --- Languages & frameworks ---
    ("PHP", &[Rule::Header("x-powered-by", "php"), Rule::Header("set-cookie", "phpsessid")]),
    ("ASP.NET", &[Rule::Header("x-aspnet-version", ""), Rule::Header("x-powered-by", "asp.net")]),
    ("Java", &[Rule::Header("set-cookie", "jsessionid")]),
    ("Django", &[Rule::Header("set-cookie", "csrftoken")]),
    ("Ruby on Rails", &[Rule::Header("set-cookie", "_rails_session")]),
    ("Express", &[Rule::Header("x-powered-by", "express")]),
    // --- Front-end ---
    ("Next.js", &[Rule::Header("x-powered-by", "next.js"), Rule::Body("/_next/static/")]),
    ("Nuxt.js", &[Rule::Body("__NUXT__")]),
    ("Angular", &[Rule::Body("ng-version=")]),
    ("Gatsby", &[Rule::Body("id=\"___gatsby\"")]),
    ("React", &[Rule::Body("data-reactroot"), Rule::Body("react-dom")]),
    ("Vue.js", &[Rule::Body("data-v-app"), Rule::Body("__VUE_")]),
    ("jQuery", &[Rule::Body("jquery.min.js"), Rule::Body("jquery.js")]),
    ("Bootstrap", &[Rule::Body("bootstrap.min.css")]),
    ("Google Analytics", &[Rule::Body("googletagmanager.com/"), Rule::Body("google-analytics.com/")]),
    // --- Admin panels & appliances ---
    ("Jenkins", &[Rule::Header("x-jenkins", ""), Rule::Title("dashboard [jenkins]")]),
    ("Grafana", &[Rule::Title("grafana")]),
    ("Kibana", &[Rule::Header("kbn-name", ""), Rule::Title("kibana")]),
    ("GitLab", &[Rule::Title("gitlab"), Rule::Meta("og:site_name", "gitlab")]),
    ("phpMyAdmin", &[Rule::Title("phpmyadmin")]),
];

static WAFS: Table = &[
    ("Cloudflare", &[Rule::Header("cf-ray", ""), Rule::Header("server", "cloudflare")]),
    ("Akamai", &[Rule::Header("server", "akamaighost"), Rule::Header("x-akamai-transformed", "")]),
    ("Imperva Incapsula", &[Rule::Header("x-iinfo", ""), Rule::Header("x-cdn", "incapsula")]),
    ("Sucuri", &[Rule::Header("x-sucuri-id", ""), Rule::Header("server", "sucuri")]),
    ("AWS WAF", &[Rule::Header("x-amzn-waf-action", ""), Rule::Body("Request blocked by AWS WAF")]),
    ("F5 BIG-IP ASM", &[Rule::Body("The requested URL was rejected. Please consult with your administrator.")]),
    ("Barracuda", &[Rule::Header("set-cookie", "barra_counter_session")]),
    ("ModSecurity", &[Rule::Header("server", "mod_security"), Rule::Body("This error was generated by Mod_Security")]),
    ("Wordfence", &[Rule::Body("Generated by Wordfence")]),
    ("Fastly", &[Rule::Header("x-fastly-request-id", "")]),
];

static TAKEOVERS: Table = &[
    ("GitHub Pages", &[Rule::Body("There isn't a GitHub Pages site here")]),
    ("Heroku", &[Rule::Body("herokucdn.com/error-pages/no-such-app.html")]),
    ("AWS S3 Bucket", &[Rule::Body("The specified bucket does not exist")]),
    ("Shopify", &[Rule::Body("Sorry, this shop is currently unavailable")]),
    ("Fastly", &[Rule::Body("Fastly error: unknown domain")]),
    ("Azure", &[Rule::Body("404 Web Site not found")]),
    ("Tumblr", &[Rule::Body("Whatever you were looking for doesn't currently exist at this address")]),
    ("Zendesk", &[Rule::Body("Help Center Closed")]),
    ("Surge.sh", &[Rule::Body("project not found")]),
    ("Bitbucket", &[Rule::Body("Repository not found")]),
    ("Pantheon", &[Rule::Body("The gods are wise, but do not know of the site which you seek")]),
    ("Ghost", &[Rule::Body("The thing you were looking for is no longer here, or never was")]),
    ("Netlify", &[Rule::Body("Not Found - Request ID:")]),
];
