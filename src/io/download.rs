//! Granule search and download against NASA Earthdata (CMR + LAADS)

use crate::types::{BoundingBox, NtlError, NtlResult};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// VIIRS Black Marble monthly product
pub const VNP46A3_SHORT_NAME: &str = "VNP46A3";

pub const CMR_GRANULE_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";

pub const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";

const TOKEN_URL: &str = "https://urs.earthdata.nasa.gov/api/users/find_or_create_token";

const CMR_PAGE_SIZE: usize = 2000;

const DATA_LINK_REL: &str = "http://esipfed.org/ns/fedsearch/1.1/data#";

/// Granule search parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleQuery {
    pub short_name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub bbox: BoundingBox,
}

impl GranuleQuery {
    /// Full calendar year `year` over `bbox`
    pub fn for_year(short_name: &str, year: i32, bbox: &BoundingBox) -> NtlResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| NtlError::InvalidInput(format!("Invalid year: {}", year)))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| NtlError::InvalidInput(format!("Invalid year: {}", year)))?;
        Ok(Self { short_name: short_name.to_string(), start, end, bbox: *bbox })
    }

    /// CMR `temporal` parameter
    pub fn temporal(&self) -> String {
        format!(
            "{}T00:00:00Z,{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    /// CMR `bounding_box` parameter (W,S,E,N)
    pub fn bounding_box(&self) -> String {
        let (w, s, e, n) = self.bbox.as_tuple();
        format!("{},{},{},{}", w, s, e, n)
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleRecord {
    pub id: String,
    pub title: String,
    pub time_start: Option<String>,
    pub data_links: Vec<String>,
}

/// Remote granule archive: search plus bulk download
pub trait GranuleArchive {
    fn search(&self, query: &GranuleQuery) -> NtlResult<Vec<GranuleRecord>>;

    /// Download every data file of `granules` into `out_dir`
    fn download(&self, granules: &[GranuleRecord], out_dir: &Path) -> NtlResult<Vec<PathBuf>>;
}

/// Earthdata Login credentials
#[derive(Clone, PartialEq)]
pub enum EarthdataCredentials {
    Token(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for EarthdataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EarthdataCredentials::Token(_) => write!(f, "Token(***)"),
            EarthdataCredentials::Basic { username, .. } => write!(f, "Basic({}, ***)", username),
        }
    }
}

impl EarthdataCredentials {
    /// `EARTHDATA_TOKEN`, else `EARTHDATA_USERNAME` + `EARTHDATA_PASSWORD`
    pub fn from_env() -> Option<Self> {
        if let Ok(token) = std::env::var("EARTHDATA_TOKEN") {
            if !token.trim().is_empty() {
                return Some(EarthdataCredentials::Token(token.trim().to_string()));
            }
        }
        match (std::env::var("EARTHDATA_USERNAME"), std::env::var("EARTHDATA_PASSWORD")) {
            (Ok(username), Ok(password)) if !username.is_empty() => {
                Some(EarthdataCredentials::Basic { username, password })
            }
            _ => None,
        }
    }

    /// Login entry for `host` in a netrc file, if present
    pub fn from_netrc<P: AsRef<Path>>(path: P, host: &str) -> NtlResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(parse_netrc(&content, host))
    }

    /// Environment first, then `~/.netrc`
    pub fn discover() -> NtlResult<Self> {
        if let Some(credentials) = Self::from_env() {
            log::debug!("Using Earthdata credentials from environment");
            return Ok(credentials);
        }
        if let Some(home) = dirs::home_dir() {
            if let Some(credentials) = Self::from_netrc(home.join(".netrc"), EARTHDATA_HOST)? {
                log::debug!("Using Earthdata credentials from ~/.netrc");
                return Ok(credentials);
            }
        }
        Err(NtlError::Auth(format!(
            "No Earthdata credentials: set EARTHDATA_TOKEN, EARTHDATA_USERNAME/EARTHDATA_PASSWORD, \
             or add a '{}' entry to ~/.netrc",
            EARTHDATA_HOST
        )))
    }
}

/// Find `machine <host> login <user> password <pass>` in netrc text
pub fn parse_netrc(content: &str, host: &str) -> Option<EarthdataCredentials> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "machine" && tokens.get(i + 1) == Some(&host) {
            let mut username = None;
            let mut password = None;
            let mut j = i + 2;
            while j + 1 < tokens.len() && tokens[j] != "machine" && tokens[j] != "default" {
                match tokens[j] {
                    "login" => username = Some(tokens[j + 1].to_string()),
                    "password" => password = Some(tokens[j + 1].to_string()),
                    _ => {}
                }
                j += 2;
            }
            return match (username, password) {
                (Some(username), Some(password)) => {
                    Some(EarthdataCredentials::Basic { username, password })
                }
                _ => None,
            };
        }
        i += 1;
    }
    None
}

#[derive(Debug, Deserialize)]
struct CmrResponse {
    feed: CmrFeed,
}

#[derive(Debug, Deserialize)]
struct CmrFeed {
    #[serde(default)]
    entry: Vec<CmrEntry>,
}

#[derive(Debug, Deserialize)]
struct CmrEntry {
    id: String,
    #[serde(default)]
    title: String,
    time_start: Option<String>,
    #[serde(default)]
    links: Vec<CmrLink>,
}

#[derive(Debug, Deserialize)]
struct CmrLink {
    href: String,
    #[serde(default)]
    rel: String,
    #[serde(default)]
    inherited: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Turn a CMR granule JSON response into records with their data links
pub fn parse_cmr_granules(body: &str) -> NtlResult<Vec<GranuleRecord>> {
    let response: CmrResponse = serde_json::from_str(body)?;
    Ok(response
        .feed
        .entry
        .into_iter()
        .map(|entry| {
            let data_links = entry
                .links
                .into_iter()
                .filter(|l| l.rel == DATA_LINK_REL && !l.inherited && l.href.starts_with("http"))
                .map(|l| l.href)
                .collect();
            GranuleRecord {
                id: entry.id,
                title: entry.title,
                time_start: entry.time_start,
                data_links,
            }
        })
        .collect())
}

/// Total from a `CMR-Hits` header when it exceeds the `returned` count
pub fn unreturned_hits(hits_header: Option<&str>, returned: usize) -> Option<usize> {
    let hits = hits_header?.trim().parse::<usize>().ok()?;
    (hits > returned).then_some(hits)
}

/// Earthdata client: CMR search (anonymous) and authenticated downloads
pub struct EarthdataClient {
    client: reqwest::blocking::Client,
    search_url: String,
    token: Option<String>,
}

impl EarthdataClient {
    pub fn new() -> NtlResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(concat!("nightlight/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, search_url: CMR_GRANULE_SEARCH_URL.to_string(), token: None })
    }

    /// Client authenticated with discovered credentials
    pub fn login() -> NtlResult<Self> {
        let mut client = Self::new()?;
        client.authenticate(&EarthdataCredentials::discover()?)?;
        Ok(client)
    }

    /// Resolve credentials to a bearer token
    pub fn authenticate(&mut self, credentials: &EarthdataCredentials) -> NtlResult<()> {
        let token = match credentials {
            EarthdataCredentials::Token(token) => token.clone(),
            EarthdataCredentials::Basic { username, password } => {
                log::info!("Requesting Earthdata token for {}", username);
                let response = self
                    .client
                    .post(TOKEN_URL)
                    .basic_auth(username, Some(password))
                    .send()?;
                if !response.status().is_success() {
                    return Err(NtlError::Auth(format!(
                        "Earthdata login failed: HTTP {}",
                        response.status().as_u16()
                    )));
                }
                let body = response.text()?;
                let parsed: TokenResponse = serde_json::from_str(&body)?;
                parsed.access_token
            }
        };
        self.token = Some(token);
        Ok(())
    }

    fn download_file(&self, url: &str, out_dir: &Path) -> NtlResult<PathBuf> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| NtlError::Auth("Not logged in to Earthdata".to_string()))?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| NtlError::Download(format!("Cannot derive file name from {}", url)))?;
        let output_path = out_dir.join(file_name);
        let partial_path = out_dir.join(format!("{}.part", file_name));

        log::info!("Downloading {}", file_name);
        let mut response = self.client.get(url).bearer_auth(token).send()?;
        if !response.status().is_success() {
            return Err(NtlError::Download(format!(
                "HTTP {} {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or(""),
                url
            )));
        }

        let mut file = std::fs::File::create(&partial_path)?;
        let bytes = response.copy_to(&mut file)?;
        drop(file);
        std::fs::rename(&partial_path, &output_path)?;

        log::debug!("Wrote {} bytes to {}", bytes, output_path.display());
        Ok(output_path)
    }
}

impl GranuleArchive for EarthdataClient {
    fn search(&self, query: &GranuleQuery) -> NtlResult<Vec<GranuleRecord>> {
        log::debug!("CMR search: {:?}", query);
        let page_size = CMR_PAGE_SIZE.to_string();
        let temporal = query.temporal();
        let bounding_box = query.bounding_box();

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("short_name", query.short_name.as_str()),
                ("temporal", temporal.as_str()),
                ("bounding_box", bounding_box.as_str()),
                ("page_size", page_size.as_str()),
            ])
            .send()?;

        if !response.status().is_success() {
            return Err(NtlError::Download(format!(
                "CMR search failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let hits_header = response
            .headers()
            .get("CMR-Hits")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let granules = parse_cmr_granules(&response.text()?)?;

        if let Some(hits) = unreturned_hits(hits_header.as_deref(), granules.len()) {
            log::warn!(
                "CMR reports {} granules for {} but only {} were returned; the rest are not downloaded",
                hits,
                query.temporal(),
                granules.len()
            );
        }
        Ok(granules)
    }

    fn download(&self, granules: &[GranuleRecord], out_dir: &Path) -> NtlResult<Vec<PathBuf>> {
        let mut downloaded = Vec::new();
        for granule in granules {
            if granule.data_links.is_empty() {
                log::warn!("Granule {} has no data links", granule.id);
            }
            for url in &granule.data_links {
                downloaded.push(self.download_file(url, out_dir)?);
            }
        }
        Ok(downloaded)
    }
}

/// `*.h5` files already in `dir`, sorted. A missing directory holds none.
pub fn existing_granules(dir: &Path) -> NtlResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == "h5") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Searches and downloads Black Marble granules
pub struct BlackMarbleDownloader<A: GranuleArchive> {
    archive: A,
    short_name: String,
}

impl<A: GranuleArchive> BlackMarbleDownloader<A> {
    pub fn new(archive: A) -> Self {
        Self { archive, short_name: VNP46A3_SHORT_NAME.to_string() }
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Granules of the product for a whole year over `bbox`
    pub fn search_year(&self, year: i32, bbox: &BoundingBox) -> NtlResult<Vec<GranuleRecord>> {
        let query = GranuleQuery::for_year(&self.short_name, year, bbox)?;
        self.archive.search(&query)
    }

    /// Download search results into `out_dir` unless it already holds `.h5`
    /// files, in which case those are returned untouched.
    pub fn download_granules(&self, results: &[GranuleRecord], out_dir: &Path) -> NtlResult<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;

        let existing = existing_granules(out_dir)?;
        if !existing.is_empty() {
            log::info!("Already downloaded: {} files in {}", existing.len(), out_dir.display());
            return Ok(existing);
        }

        let mut downloaded = self.archive.download(results, out_dir)?;
        downloaded.sort();
        Ok(downloaded)
    }

    /// Search plus download for one year into `<raw_dir>/blackmarble/<year>`
    pub fn download_year(&self, year: i32, bbox: &BoundingBox, raw_dir: &Path) -> NtlResult<Vec<PathBuf>> {
        let out_dir = year_dir(raw_dir, year);
        let results = self.search_year(year, bbox)?;
        log::info!("{}: {} granules found", year, results.len());

        let files = self.download_granules(&results, &out_dir)?;
        log::info!("{}: {} files downloaded", year, files.len());
        Ok(files)
    }
}

/// Raw granule directory of a year
pub fn year_dir(raw_dir: &Path, year: i32) -> PathBuf {
    raw_dir.join("blackmarble").join(year.to_string())
}
