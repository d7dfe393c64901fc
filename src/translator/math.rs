//! `Math.*` translators.

use super::{MethodCallSite, TranslationContext};
use crate::expr::declaring;
use crate::sql::{SqlExpr, func};

#[derive(Debug, Default, Clone, Copy)]
pub struct MathTranslator;

impl super::MethodCallTranslator for MathTranslator {
    fn translate(&self, call: &MethodCallSite<'_>, _: &mut TranslationContext) -> Option<SqlExpr> {
        if &*call.method.declaring != declaring::MATH || call.target.is_some() {
            return None;
        }
        let [arg] = call.args else {
            return None;
        };
        if !arg.ty.is_numeric() {
            return None;
        }
        let name = match &*call.method.name {
            "Abs" => func::ABS,
            "Round" => func::ROUND,
            "Floor" => func::FLOOR,
            "Ceiling" => func::CEILING,
            _ => return None,
        };
        Some(SqlExpr::function(name, vec![arg.sql.clone()]))
    }
}
