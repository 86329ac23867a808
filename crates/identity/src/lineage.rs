use core::str::FromStr;

use serde::{Deserialize, Serialize};

use procura_core::{AuthorId, DomainError, DomainResult};

/// Fixed length of the author fragment embedded in every lineage id.
pub const AUTHOR_FRAGMENT_LEN: usize = 8;

const SEQUENCE_WIDTH: usize = 4;

/// Which entity a lineage id names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    Cart,
    Order,
    PurchaseOrder,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::Cart => "CRT",
            IdKind::Order => "ORD",
            IdKind::PurchaseOrder => "PO",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "CRT" => Some(IdKind::Cart),
            "ORD" => Some(IdKind::Order),
            "PO" => Some(IdKind::PurchaseOrder),
            _ => None,
        }
    }
}

/// Parsed form of a lineage identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineageId {
    pub kind: IdKind,
    pub author_fragment: String,
    pub sequence: u64,
    /// `V<n>` disambiguation suffix; only purchase orders carry one.
    pub vendor_suffix: Option<u32>,
}

impl LineageId {
    /// Re-render the same author/sequence under another entity kind.
    pub fn with_kind(&self, kind: IdKind, vendor_suffix: Option<u32>) -> Self {
        Self {
            kind,
            author_fragment: self.author_fragment.clone(),
            sequence: self.sequence,
            vendor_suffix,
        }
    }
}

impl core::fmt::Display for LineageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.kind.prefix(),
            self.author_fragment,
            self.sequence,
            width = SEQUENCE_WIDTH
        )?;
        if let Some(n) = self.vendor_suffix {
            write!(f, "-V{n}")?;
        }
        Ok(())
    }
}

impl FromStr for LineageId {
    type Err = DomainError;

    /// Parses any well-formed lineage id, including a trailing `-V<n>` on
    /// purchase-order ids.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, vendor_suffix) = match s.rsplit_once('-') {
            Some((head, tail)) if s.starts_with("PO-") => match parse_vendor_suffix(tail) {
                Some(n) => (head, Some(n)),
                None => (s, None),
            },
            _ => (s, None),
        };

        let (prefix, author_fragment, sequence) = split_lineage(base)?;
        let kind = IdKind::from_prefix(prefix)
            .ok_or_else(|| DomainError::malformed_id(format!("{s}: unknown prefix {prefix:?}")))?;

        Ok(Self {
            kind,
            author_fragment,
            sequence,
            vendor_suffix,
        })
    }
}

fn parse_vendor_suffix(segment: &str) -> Option<u32> {
    let digits = segment.strip_prefix('V')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Split `<prefix>-<fragment…>-<sequence>` into its parts.
///
/// The fragment is everything between the first and the last hyphen so ids
/// minted from hyphenated author text still parse.
fn split_lineage(s: &str) -> DomainResult<(&str, String, u64)> {
    let segments: Vec<&str> = s.split('-').collect();
    if segments.len() < 3 {
        return Err(DomainError::malformed_id(format!(
            "{s}: expected at least three hyphen-delimited segments"
        )));
    }

    let last = segments[segments.len() - 1];
    if last.is_empty() || !last.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::malformed_id(format!(
            "{s}: final segment {last:?} is not a non-negative integer"
        )));
    }
    let sequence = last
        .parse::<u64>()
        .map_err(|e| DomainError::malformed_id(format!("{s}: {e}")))?;

    let fragment = segments[1..segments.len() - 1].join("-");
    if fragment.is_empty() {
        return Err(DomainError::malformed_id(format!("{s}: empty author fragment")));
    }

    Ok((segments[0], fragment, sequence))
}

/// Deterministic fixed-length fragment of an author id.
///
/// Takes the first eight ASCII alphanumeric characters and right-pads with
/// `0` when the author id is shorter.
pub fn author_fragment(author: &AuthorId) -> String {
    let mut fragment: String = author
        .as_str()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(AUTHOR_FRAGMENT_LEN)
        .collect();
    while fragment.len() < AUTHOR_FRAGMENT_LEN {
        fragment.push('0');
    }
    fragment
}

macro_rules! lineage_newtype {
    ($t:ident, $kind:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Parsed lineage components.
            pub fn lineage(&self) -> DomainResult<LineageId> {
                self.0.parse()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let parsed: LineageId = s.parse()?;
                if parsed.kind != $kind {
                    return Err(DomainError::malformed_id(format!(
                        "{s}: expected a {} id",
                        $kind.prefix()
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

lineage_newtype!(CartId, IdKind::Cart, "Cart identifier: `CRT-<fragment>-<seq>`.");
lineage_newtype!(OrderId, IdKind::Order, "Order identifier: `ORD-<fragment>-<seq>`.");
lineage_newtype!(
    PurchaseOrderId,
    IdKind::PurchaseOrder,
    "Purchase order identifier: `PO-<fragment>-<seq>[-V<n>]`."
);

/// `CRT-<fragment>-<sequence padded to 4 digits>`.
pub fn format_cart_id(author: &AuthorId, sequence: u64) -> CartId {
    let id = LineageId {
        kind: IdKind::Cart,
        author_fragment: author_fragment(author),
        sequence,
        vendor_suffix: None,
    };
    CartId(id.to_string())
}

/// Re-render a cart id as its order id (`ORD-` prefix, same fragment and sequence).
pub fn derive_order_id(cart_id: &str) -> DomainResult<OrderId> {
    let (_, author_fragment, sequence) = split_lineage(cart_id)?;
    let id = LineageId {
        kind: IdKind::Order,
        author_fragment,
        sequence,
        vendor_suffix: None,
    };
    Ok(OrderId(id.to_string()))
}

/// Re-render an order id as a purchase-order id, optionally suffixed `-V<n>`.
pub fn derive_purchase_order_id(
    order_id: &str,
    vendor_suffix: Option<u32>,
) -> DomainResult<PurchaseOrderId> {
    let (_, author_fragment, sequence) = split_lineage(order_id)?;
    let id = LineageId {
        kind: IdKind::PurchaseOrder,
        author_fragment,
        sequence,
        vendor_suffix,
    };
    Ok(PurchaseOrderId(id.to_string()))
}

/// Author fragment of any lineage id.
pub fn extract_author_fragment(id: &str) -> DomainResult<String> {
    Ok(id.parse::<LineageId>()?.author_fragment)
}
