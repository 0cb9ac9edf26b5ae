use anyhow::bail;
use std::str::FromStr;
use url::Url;

use crate::error::ScrapeError;
use crate::scrapers::types::ListingFilter;

/// Classifieds site a scraper targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Krisha,
    Olx,
}

impl FromStr for Site {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "krisha" | "krisha.kz" => Ok(Site::Krisha),
            "olx" | "olx.kz" => Ok(Site::Olx),
            other => bail!("unknown site '{}'", other),
        }
    }
}

impl Site {
    pub fn name(&self) -> &'static str {
        match self {
            Site::Krisha => "krisha",
            Site::Olx => "olx",
        }
    }

    pub fn default_origin(&self) -> &'static str {
        match self {
            Site::Krisha => "https://krisha.kz",
            Site::Olx => "https://www.olx.kz",
        }
    }

    /// Sites that throttle concurrent clients get a reduced worker pool
    pub fn is_rate_sensitive(&self) -> bool {
        matches!(self, Site::Olx)
    }

    /// Search results URL for one page of `filter`
    pub fn search_url(
        &self,
        origin: &str,
        filter: &ListingFilter,
        page: u32,
    ) -> Result<Url, ScrapeError> {
        let city = self.city_slug(&filter.city);
        let (path, mut params) = match self {
            Site::Krisha => {
                let mut location = city;
                if let Some(district) = filter.district.as_deref().map(str::trim) {
                    if !district.is_empty() {
                        location = format!("{}-{}", location, district);
                    }
                }
                let path = format!(
                    "/prodazha/{}/{}/",
                    filter.property_type.slug(),
                    location
                );
                (path, krisha_params(filter))
            }
            Site::Olx => (
                format!("/nedvizhimost/prodazha-kvartiry/{}/", city),
                olx_params(filter),
            ),
        };

        if page > 1 {
            params.push(("page", page.to_string()));
        }

        let mut url = Url::parse(origin)?.join(&path)?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn city_slug(&self, city: &str) -> String {
        let city = city.trim();
        let canonical = match city.to_lowercase().as_str() {
            "алматы" | "almaty" | "alma-ata" => "almaty",
            "астана" | "нур-султан" | "astana" | "nur-sultan" => "astana",
            "шымкент" | "shymkent" => "shymkent",
            "караганда" | "karaganda" => "karaganda",
            _ => return city.to_lowercase().replace(' ', "-"),
        };
        match (self, canonical) {
            (Site::Olx, "almaty") => "alma-ata".to_string(),
            _ => canonical.to_string(),
        }
    }
}

fn krisha_params(filter: &ListingFilter) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    let mut push = |key: &'static str, value: Option<String>| {
        if let Some(v) = value {
            params.push((key, v));
        }
    };
    let flag = |set: bool| set.then(|| "1".to_string());

    push("das[live.rooms]", filter.rooms.map(|v| v.to_string()));
    push("das[price][from]", filter.price_from.map(|v| v.to_string()));
    push("das[price][to]", filter.price_to.map(|v| v.to_string()));
    push("das[live.square][from]", filter.area_from.map(|v| v.to_string()));
    push("das[live.square][to]", filter.area_to.map(|v| v.to_string()));
    push(
        "das[kitchen.square][from]",
        filter.kitchen_area_from.map(|v| v.to_string()),
    );
    push(
        "das[kitchen.square][to]",
        filter.kitchen_area_to.map(|v| v.to_string()),
    );
    push("das[flat.floor][from]", filter.floor_from.map(|v| v.to_string()));
    push("das[flat.floor][to]", filter.floor_to.map(|v| v.to_string()));
    push(
        "das[house.floor_num][from]",
        filter.house_floor_from.map(|v| v.to_string()),
    );
    push(
        "das[house.floor_num][to]",
        filter.house_floor_to.map(|v| v.to_string()),
    );
    push("das[house.year][from]", filter.year_from.map(|v| v.to_string()));
    push("das[house.year][to]", filter.year_to.map(|v| v.to_string()));
    push("das[_sys.hasphoto]", flag(filter.has_photo));
    push("das[novostroiki]", flag(filter.new_building));
    push("das[who]", filter.seller_type.map(|s| s.code().to_string()));
    push("das[floor_not_first]", flag(filter.floor_not_first));
    push("das[floor_not_last]", flag(filter.floor_not_last));
    push(
        "das[map.complex]",
        filter
            .complex
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    );

    params
}

fn olx_params(filter: &ListingFilter) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(from) = filter.price_from.filter(|p| *p > 0) {
        params.push(("search[filter_float_price:from]", from.to_string()));
    }
    if let Some(to) = filter.price_to.filter(|p| *p > 0) {
        params.push(("search[filter_float_price:to]", to.to_string()));
    }
    if let Some(rooms) = filter.rooms.filter(|r| *r > 0) {
        params.push(("search[filter_enum_kolichestvokomnat][0]", rooms.to_string()));
    }
    params
}
