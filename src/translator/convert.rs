//! Type conversion translator.

use super::{ConversionSite, TranslationContext};
use crate::expr::TypeKind;
use crate::sql::SqlExpr;
use crate::value::ValueType;

/// Boxing to `object` and identity conversions are transparent; scalar
/// conversions between numeric, text and boolean types become casts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvertTranslator;

impl super::ConversionTranslator for ConvertTranslator {
    fn translate(
        &self,
        conversion: &ConversionSite<'_>,
        _: &mut TranslationContext,
    ) -> Option<SqlExpr> {
        let operand = conversion.operand;
        if conversion.to.kind == TypeKind::Object || conversion.to.kind == operand.ty.kind {
            return Some(operand.sql.clone());
        }
        let from = operand.ty.value_type()?;
        let to = conversion.to.value_type()?;
        let allowed = matches!(
            (from, to),
            (ValueType::Int, ValueType::Float)
                | (ValueType::Float, ValueType::Int)
                | (ValueType::Bool, ValueType::Int)
                | (_, ValueType::Text)
                | (ValueType::Text, ValueType::Int | ValueType::Float)
        );
        allowed.then(|| SqlExpr::Cast {
            operand: Box::new(operand.sql.clone()),
            to,
        })
    }
}
