//! Operation identity: a stable key for one logical call.
//!
//! Identical logical calls (same component, operation and arguments in the
//! same order) always produce identical identities. Arguments that are not
//! deterministic (timestamps, request ids) or not safe to log (passwords) must
//! be left out with [`OperationId::skip`].

use std::borrow::Cow;

use serde::Serialize;
use uuid::Uuid;

/// Rendering of an argument to its stable string form.
pub trait KeyPart {
    fn key_part(&self) -> String;
}

macro_rules! impl_key_part_display {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyPart for $t {
                fn key_part(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_key_part_display!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char);
impl_key_part_display!(str, String, Uuid);

impl<T: KeyPart + ?Sized> KeyPart for &T {
    fn key_part(&self) -> String {
        (**self).key_part()
    }
}

impl<T: KeyPart> KeyPart for Option<T> {
    fn key_part(&self) -> String {
        match self {
            Some(v) => v.key_part(),
            None => "null".to_string(),
        }
    }
}

/// Render a serializable argument (e.g. a filter DTO) as compact JSON.
///
/// Struct fields serialize in declaration order, so the rendering is stable.
/// Values that fail to serialize render as `"null"`.
pub fn json_arg<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Identity of one call: declaring component, operation name and the
/// normalized arguments relevant to caching/authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId {
    component: Cow<'static, str>,
    operation: Cow<'static, str>,
    args: Vec<String>,
    skipped: usize,
}

impl OperationId {
    pub fn new(
        component: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            args: Vec::new(),
            skipped: 0,
        }
    }

    /// Append an argument. Order is significant.
    pub fn arg(mut self, value: impl KeyPart) -> Self {
        self.args.push(value.key_part());
        self
    }

    /// Append an already-rendered argument.
    pub fn raw_arg(mut self, rendered: impl Into<String>) -> Self {
        self.args.push(rendered.into());
        self
    }

    /// Record that an argument was deliberately excluded from the identity.
    pub fn skip(mut self) -> Self {
        self.skipped += 1;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// `component.operation`, used as the log label.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.component, self.operation)
    }

    /// Argument summary for logs; excluded arguments are not mentioned by value.
    pub fn args_summary(&self) -> String {
        let mut summary = self.args.join(", ");
        if self.skipped > 0 {
            if !summary.is_empty() {
                summary.push_str(", ");
            }
            summary.push_str(&format!("<{} excluded>", self.skipped));
        }
        summary
    }

    /// `prefix + component + "." + operation + "_" + join("_", args)`.
    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{}{}.{}_{}",
            prefix,
            self.component,
            self.operation,
            self.args.join("_")
        )
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}({})", self.component, self.operation, self.args_summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cart_lookup_key_matches_expected_layout() {
        let id = OperationId::new("CartQueryService", "GetCartByUserId").arg(7);
        assert_eq!(
            id.cache_key("cart:user:"),
            "cart:user:CartQueryService.GetCartByUserId_7"
        );
    }

    #[test]
    fn absent_values_render_as_null() {
        let id = OperationId::new("ProductQueryService", "Search")
            .arg(Some("shoes"))
            .arg(None::<i64>);
        assert_eq!(id.cache_key(""), "ProductQueryService.Search_shoes_null");
    }

    #[test]
    fn zero_arguments_keep_the_separator() {
        let id = OperationId::new("OrderQueryService", "GetAllOrders");
        assert_eq!(id.cache_key("orders:all"), "orders:allOrderQueryService.GetAllOrders_");
    }

    #[test]
    fn skipped_arguments_do_not_reach_the_key_or_the_log() {
        let id = OperationId::new("UserCommandService", "ChangePassword")
            .arg(42)
            .skip();
        assert_eq!(id.cache_key(""), "UserCommandService.ChangePassword_42");
        assert_eq!(id.args_summary(), "42, <1 excluded>");
    }

    #[derive(Serialize)]
    struct Filter {
        category: &'static str,
        max_price: u32,
    }

    #[test]
    fn json_arguments_are_stable() {
        let a = OperationId::new("ProductQueryService", "Filter")
            .raw_arg(json_arg(&Filter { category: "books", max_price: 20 }));
        let b = OperationId::new("ProductQueryService", "Filter")
            .raw_arg(json_arg(&Filter { category: "books", max_price: 20 }));
        assert_eq!(a.cache_key("p:"), b.cache_key("p:"));
        assert_eq!(a.args()[0], r#"{"category":"books","max_price":20}"#);
    }

    proptest! {
        #[test]
        fn equal_calls_yield_equal_keys(args in prop::collection::vec(any::<i64>(), 0..6)) {
            let build = || args.iter().fold(OperationId::new("C", "op"), |id, a| id.arg(*a));
            prop_assert_eq!(build().cache_key("p:"), build().cache_key("p:"));
            prop_assert_eq!(build(), build());
        }

        #[test]
        fn argument_order_is_significant(a in any::<u32>(), b in any::<u32>()) {
            prop_assume!(a != b);
            let ab = OperationId::new("C", "op").arg(a).arg(b);
            let ba = OperationId::new("C", "op").arg(b).arg(a);
            prop_assert_ne!(ab.cache_key(""), ba.cache_key(""));
        }
    }
}
