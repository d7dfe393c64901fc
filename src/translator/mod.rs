//! Translator registry.
//!
//! Method calls, member accesses and conversions that the front end cannot
//! map structurally are offered to an ordered list of translators. The first
//! translator that returns `Some` wins; `None` means "not mine" and the next
//! one is tried. Providers register extra translators ahead of
//! ([`TranslatorRegistry::register_method_first`]) or after the defaults,
//! or start from [`TranslatorRegistry::empty`].

pub mod convert;
pub mod equals;
pub mod math;
pub mod string;

use crate::error::Diagnostic;
use crate::expr::{ExprRef, ExprType, Method};
use crate::sql::SqlExpr;
use std::fmt;
use std::sync::Arc;

/// An operand that has already been translated.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    pub sql: SqlExpr,
    /// Static type of the host expression.
    pub ty: ExprType,
    /// The bound host expression it was translated from.
    pub expr: ExprRef,
}

/// A method call whose target and arguments are already translated.
#[derive(Debug)]
pub struct MethodCallSite<'a> {
    pub method: &'a Method,
    pub target: Option<&'a SqlFragment>,
    pub args: &'a [SqlFragment],
    /// Static result type of the call.
    pub ty: &'a ExprType,
}

impl MethodCallSite<'_> {
    pub fn is(&self, declaring: &str, name: &str) -> bool {
        self.method.is(declaring, name)
    }
}

#[derive(Debug)]
pub struct MemberSite<'a> {
    pub target: &'a SqlFragment,
    pub member: &'a str,
    pub ty: &'a ExprType,
}

#[derive(Debug)]
pub struct ConversionSite<'a> {
    pub operand: &'a SqlFragment,
    pub to: &'a ExprType,
}

/// Per-compilation state visible to translators.
#[derive(Debug, Default)]
pub struct TranslationContext {
    diagnostics: Vec<Diagnostic>,
}

impl TranslationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal diagnostic.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

pub trait MethodCallTranslator: Send + Sync {
    fn translate(&self, call: &MethodCallSite<'_>, ctx: &mut TranslationContext) -> Option<SqlExpr>;
}

pub trait MemberTranslator: Send + Sync {
    fn translate(&self, member: &MemberSite<'_>, ctx: &mut TranslationContext) -> Option<SqlExpr>;
}

pub trait ConversionTranslator: Send + Sync {
    fn translate(&self, conversion: &ConversionSite<'_>, ctx: &mut TranslationContext)
    -> Option<SqlExpr>;
}

impl<F> MethodCallTranslator for F
where
    F: Fn(&MethodCallSite<'_>, &mut TranslationContext) -> Option<SqlExpr> + Send + Sync,
{
    fn translate(&self, call: &MethodCallSite<'_>, ctx: &mut TranslationContext) -> Option<SqlExpr> {
        self(call, ctx)
    }
}

impl<F> MemberTranslator for F
where
    F: Fn(&MemberSite<'_>, &mut TranslationContext) -> Option<SqlExpr> + Send + Sync,
{
    fn translate(&self, member: &MemberSite<'_>, ctx: &mut TranslationContext) -> Option<SqlExpr> {
        self(member, ctx)
    }
}

impl<F> ConversionTranslator for F
where
    F: Fn(&ConversionSite<'_>, &mut TranslationContext) -> Option<SqlExpr> + Send + Sync,
{
    fn translate(
        &self,
        conversion: &ConversionSite<'_>,
        ctx: &mut TranslationContext,
    ) -> Option<SqlExpr> {
        self(conversion, ctx)
    }
}

/// Ordered translator lists.
#[derive(Clone)]
pub struct TranslatorRegistry {
    methods: Vec<Arc<dyn MethodCallTranslator>>,
    members: Vec<Arc<dyn MemberTranslator>>,
    conversions: Vec<Arc<dyn ConversionTranslator>>,
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("methods", &self.methods.len())
            .field("members", &self.members.len())
            .field("conversions", &self.conversions.len())
            .finish()
    }
}

impl TranslatorRegistry {
    /// A registry with no translators at all.
    pub fn empty() -> Self {
        Self {
            methods: Vec::new(),
            members: Vec::new(),
            conversions: Vec::new(),
        }
    }

    /// The built-in translators, in priority order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_method(equals::EqualsTranslator);
        registry.register_method(string::StringMethodTranslator);
        registry.register_method(string::StringCompareTranslator);
        registry.register_method(math::MathTranslator);
        registry.register_member(string::StringLengthTranslator);
        registry.register_conversion(convert::ConvertTranslator);
        registry
    }

    /// Append a method-call translator (lowest priority).
    pub fn register_method(&mut self, translator: impl MethodCallTranslator + 'static) {
        self.methods.push(Arc::new(translator));
    }

    /// Insert a method-call translator ahead of every registered one.
    pub fn register_method_first(&mut self, translator: impl MethodCallTranslator + 'static) {
        self.methods.insert(0, Arc::new(translator));
    }

    pub fn register_member(&mut self, translator: impl MemberTranslator + 'static) {
        self.members.push(Arc::new(translator));
    }

    pub fn register_member_first(&mut self, translator: impl MemberTranslator + 'static) {
        self.members.insert(0, Arc::new(translator));
    }

    pub fn register_conversion(&mut self, translator: impl ConversionTranslator + 'static) {
        self.conversions.push(Arc::new(translator));
    }

    pub fn register_conversion_first(&mut self, translator: impl ConversionTranslator + 'static) {
        self.conversions.insert(0, Arc::new(translator));
    }

    pub fn translate_method(
        &self,
        call: &MethodCallSite<'_>,
        ctx: &mut TranslationContext,
    ) -> Option<SqlExpr> {
        self.methods.iter().find_map(|t| t.translate(call, ctx))
    }

    pub fn translate_member(
        &self,
        member: &MemberSite<'_>,
        ctx: &mut TranslationContext,
    ) -> Option<SqlExpr> {
        self.members.iter().find_map(|t| t.translate(member, ctx))
    }

    pub fn translate_conversion(
        &self,
        conversion: &ConversionSite<'_>,
        ctx: &mut TranslationContext,
    ) -> Option<SqlExpr> {
        self.conversions
            .iter()
            .find_map(|t| t.translate(conversion, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, declaring};
    use crate::sql::func;
    use crate::value::Value;

    fn fragment(sql: SqlExpr, ty: ExprType) -> SqlFragment {
        SqlFragment {
            sql,
            ty,
            expr: Expr::constant(Value::Null),
        }
    }

    #[test]
    fn test_first_match_wins() {
        fn my_upper(call: &MethodCallSite<'_>, _: &mut TranslationContext) -> Option<SqlExpr> {
            if call.is(declaring::STRING, "ToUpper") {
                Some(SqlExpr::function("my_upper", vec![call.target?.sql.clone()]))
            } else {
                None
            }
        }

        let mut registry = TranslatorRegistry::with_defaults();
        registry.register_method_first(my_upper);

        let target = fragment(SqlExpr::Parameter("name".into()), ExprType::text());
        let method = Method::new(declaring::STRING, "ToUpper");
        let ty = ExprType::text();
        let site = MethodCallSite {
            method: &method,
            target: Some(&target),
            args: &[],
            ty: &ty,
        };
        let mut ctx = TranslationContext::new();
        let sql = registry.translate_method(&site, &mut ctx).unwrap();
        assert_eq!(
            sql,
            SqlExpr::function("my_upper", vec![SqlExpr::Parameter("name".into())])
        );

        let defaults = TranslatorRegistry::with_defaults();
        let sql = defaults.translate_method(&site, &mut ctx).unwrap();
        assert_eq!(
            sql,
            SqlExpr::function(func::UPPER, vec![SqlExpr::Parameter("name".into())])
        );
    }

    #[test]
    fn test_empty_registry_translates_nothing() {
        let registry = TranslatorRegistry::empty();
        let target = fragment(SqlExpr::Parameter("name".into()), ExprType::text());
        let site = MemberSite {
            target: &target,
            member: "Length",
            ty: &ExprType::int(),
        };
        assert!(registry
            .translate_member(&site, &mut TranslationContext::new())
            .is_none());
    }
}
