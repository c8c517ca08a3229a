//! The catalog of media cases and the slicing used to shard it.

use crate::config::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

/// One named scenario: an input for the embedding library and the maximum
/// dissimilarity its capture may show.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique name, also used as the file stem of fixtures and baselines
    pub name: String,
    /// URL handed to the rendering library
    pub input: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub fixed_width: Option<u32>,
    #[serde(default)]
    pub fixed_height: Option<u32>,
}

const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl TestCase {
    pub fn new(name: &str, input: &str) -> Self {
        Self {
            name: name.to_owned(),
            input: input.to_owned(),
            threshold: DEFAULT_THRESHOLD,
            fixed_width: None,
            fixed_height: None,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_fixed_size(mut self, width: u32, height: u32) -> Self {
        self.fixed_width = Some(width);
        self.fixed_height = Some(height);
        self
    }

    /// Embed handler family: the part of the name before the first `-`.
    pub fn family(&self) -> &str {
        self.name
            .split_once('-')
            .map_or(self.name.as_str(), |(family, _rest)| family)
    }

    /// Fixed capture size, when both dimensions are set.
    pub fn fixed_size(&self) -> Option<(u32, u32)> {
        self.fixed_width.zip(self.fixed_height)
    }
}

/// Errors raised while loading a catalog.
#[derive(Debug)]
pub enum CatalogError {
    /// The catalog text is not a JSON array of cases.
    Parse(String),
    /// Two cases share a name and would collide on disk.
    DuplicateName(String),
    /// A case name cannot be used as a file stem.
    InvalidName(String),
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "catalog parse error: {msg}"),
            Self::DuplicateName(name) => write!(f, "duplicate case name: {name}"),
            Self::InvalidName(name) => write!(f, "invalid case name: {name:?}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// An ordered, immutable list of cases.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    cases: Vec<TestCase>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate or path-unsafe names.
    ///
    /// # Errors
    ///
    /// Returns an error if two cases share a name or a name is not a plain file stem.
    pub fn new(cases: Vec<TestCase>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for case in &cases {
            if case.name.is_empty()
                || case.name.contains(['/', '\\'])
                || case.name.starts_with('.')
            {
                return Err(CatalogError::InvalidName(case.name.clone()));
            }
            if !seen.insert(case.name.as_str()) {
                return Err(CatalogError::DuplicateName(case.name.clone()));
            }
        }
        Ok(Self { cases })
    }

    /// Load a catalog from a JSON array of case objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the cases are invalid.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let cases: Vec<TestCase> =
            serde_json::from_str(text).map_err(|err| CatalogError::Parse(err.to_string()))?;
        Self::new(cases)
    }

    /// The curated media catalog.
    pub fn builtin() -> Self {
        let cases = BUILTIN_CASES
            .iter()
            .map(|&(name, input, threshold)| {
                TestCase::new(name, input).with_threshold(threshold.unwrap_or(DEFAULT_THRESHOLD))
            })
            .collect();
        Self { cases }
    }

    pub fn list(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Same cases, opposite order.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            cases: self.cases.iter().rev().cloned().collect(),
        }
    }

    /// Consecutive groups of at most `size` cases. A size of 0 is treated as 1.
    pub fn chunked(&self, size: usize) -> Vec<Self> {
        self.cases
            .chunks(size.max(1))
            .map(|group| Self {
                cases: group.to_vec(),
            })
            .collect()
    }

    /// The `index`-th group of [`Catalog::chunked`], empty when out of range.
    #[must_use]
    pub fn chunk(&self, size: usize, index: usize) -> Self {
        self.chunked(size).into_iter().nth(index).unwrap_or_default()
    }

    /// Cases whose name contains `needle`.
    #[must_use]
    pub fn filter(&self, needle: &str) -> Self {
        Self {
            cases: self
                .cases
                .iter()
                .filter(|case| case.name.contains(needle))
                .cloned()
                .collect(),
        }
    }
}

/// `(name, input, threshold)`; `None` means the default threshold.
const BUILTIN_CASES: &[(&str, &str, Option<f64>)] = &[
    ("abcnews-1", "http://abcnews.go.com/WNN/video/dog-goes-wild-when-owner-leaves-22936610", None),
    ("amazon-ca", "http://www.amazon.ca/gp/product/B00GQT1LNO/", Some(0.308)),
    ("amazon-jp", "http://www.amazon.co.jp/gp/product/B003AKZ6I8/", Some(0.30)),
    ("amazon-uk", "http://www.amazon.co.uk/gp/product/B00BET0NR6/", Some(0.25)),
    ("amazon-1", "http://www.amazon.com/dp/B002MUC0ZY", Some(0.26)),
    ("amazon-2", "http://www.amazon.com/The-BeerBelly-200-001-80-Ounce-Belly/dp/B001RB2CXY/", Some(0.25)),
    ("amazon-3", "http://www.amazon.com/gp/product/B0094H8H7I", Some(0.25)),
    ("amazon-de", "http://www.amazon.de/Netgear-WN3100RP-100PES-Repeater-integrierte-Steckdose/dp/B00ET2LTE6/", Some(0.25)),
    ("amazon-fr", "http://www.amazon.fr/Vans-Authentic-Baskets-mixte-adulte/dp/B005NIKPAY/", Some(0.261)),
    ("amazon-it", "http://www.amazon.it/gp/product/B00JGOMIP6/", Some(0.25)),
    ("audiomack-song", "http://www.audiomack.com/song/your-music-fix/jammin-kungs-remix-1", None),
    ("audiomack-album", "http://www.audiomack.com/album/chance-the-rapper/acid-rap", None),
    ("bandcamp-album", "http://proleter.bandcamp.com/album/curses-from-past-times-ep", None),
    ("bandcamp-song", "http://proleter.bandcamp.com/track/april-showers", None),
    ("blip-1", "http://blip.tv/blip-on-blip/damian-bruno-and-vinyl-rewind-blip-on-blip-58-5226104", None),
    ("blip-2", "http://blip.tv/play/hr4jg5i1MwA.x?p=1", None),
    ("cbsnews-1", "http://www.cbsnews.com/video/watch/?id=50156501n", None),
    ("cbsnews-2", "http://www.cbsnews.com/videos/is-the-us-stock-market-rigged", None),
    ("cnbc-1", "http://video.cnbc.com/gallery/?video=3000269279", None),
    ("cnn-1", "http://edition.cnn.com/video/data/2.0/video/showbiz/2013/10/25/spc-preview-savages-stephen-king-thor.cnn.html", None),
    ("cnn-2", "http://us.cnn.com/video/data/2.0/video/bestoftv/2013/10/23/vo-nr-prince-george-christening-arrival.cnn.html", None),
    ("colbertnation", "http://thecolbertreport.cc.com/videos/gh6urb/neil-degrasse-tyson-pt--1", None),
    ("collegehumor", "http://www.collegehumor.com/video/1181601/more-than-friends", None),
    ("comedycentral-1", "http://www.cc.com/video-clips/uu5qz4/key-and-peele-dueling-hats", None),
    ("comedycentral-2", "http://www.comedycentral.com/video-clips/uu5qz4/key-and-peele-dueling-hats", None),
    ("dailymotion-1", "http://www.dailymotion.com/video/x222z1", None),
    ("dailymotion-2", "http://www.dailymotion.com/user/Dailymotion/2#video=x222z1", None),
    ("espn", "http://espn.go.com/video/clip?id=espn:11112012", None),
    ("espn-deportes", "http://espndeportes.espn.go.com/videohub/video/clipDeportes?id=2091094&cc=7586", None),
    ("facebook-photo", "https://www.facebook.com/photo.php?v=10100658170103643&amp;set=vb.20531316728&amp;type=3&amp;theater", None),
    ("facebook-video", "https://www.facebook.com/video/video.php?v=10150451523596807", None),
    ("facebook-post", "https://www.facebook.com/FacebookDevelopers/posts/10151471074398553", Some(0.2)),
    ("funnyordie", "http://www.funnyordie.com/videos/bf313bd8b4/murdock-with-keith-david", None),
    ("gamespot", "http://www.gamespot.com/destiny/videos/destiny-the-moon-trailer-6415176/", None),
    ("gametrailers", "http://www.gametrailers.com/reviews/zalxz0/crimson-dragon-review", None),
    ("getty-im", "http://gty.im/3232182", None),
    ("getty-com", "http://www.gettyimages.com/detail/3232182", None),
    ("getty-uk", "http://www.gettyimages.co.uk/detail/3232182", None),
    ("gfycat", "http://gfycat.com/SereneIllfatedCapybara", Some(0.4)),
    ("gist", "https://gist.github.com/s9e/6806305", None),
    ("grooveshark-playlist", "http://grooveshark.com/playlist/Purity+Ring+Shrines/74854761", None),
    ("grooveshark-song", "http://grooveshark.com/s/Soul+Below/4zGL7i?src=5", None),
];
