use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{Signed, ToPrimitive, Zero};

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Print a real literal as SMT-LIB2 decimal or quotient, e.g. `2.0`,
/// `(/ 1.0 3.0)`, `(- (/ 1.0 3.0))`.
pub fn real_to_smtlib(value: &BigRational) -> String {
    let magnitude = value.abs();
    let body = if magnitude.is_integer() {
        format!("{}.0", magnitude.numer())
    } else {
        format!("(/ {}.0 {}.0)", magnitude.numer(), magnitude.denom())
    };
    if value.is_negative() {
        format!("(- {body})")
    } else {
        body
    }
}

fn binary(op: &str, lhs: &SmtTerm, rhs: &SmtTerm) -> String {
    format!("({op} {} {})", to_smtlib(lhs), to_smtlib(rhs))
}

fn nary(op: &str, args: &[&SmtTerm]) -> String {
    let inner: Vec<String> = args.iter().map(|t| to_smtlib(t)).collect();
    format!("({op} {})", inner.join(" "))
}

/// Print an SmtTerm as SMT-LIB2 format.
///
/// Integer powers are expanded into products and `tanh` into its
/// exponential form, since neither is part of the standard signature.
pub fn to_smtlib(term: &SmtTerm) -> String {
    match term {
        SmtTerm::Var(name) => name.clone(),
        SmtTerm::RealLit(value) => real_to_smtlib(value),
        SmtTerm::BoolLit(b) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        SmtTerm::Add(lhs, rhs) => binary("+", lhs, rhs),
        SmtTerm::Sub(lhs, rhs) => binary("-", lhs, rhs),
        SmtTerm::Mul(lhs, rhs) => binary("*", lhs, rhs),
        SmtTerm::Div(lhs, rhs) => binary("/", lhs, rhs),
        SmtTerm::Neg(inner) => format!("(- {})", to_smtlib(inner)),
        SmtTerm::Pow(base, n) => match n {
            0 => "1.0".to_string(),
            1 => to_smtlib(base),
            _ => {
                let factors: Vec<&SmtTerm> = (0..*n).map(|_| base.as_ref()).collect();
                nary("*", &factors)
            }
        },
        SmtTerm::Sin(inner) => format!("(sin {})", to_smtlib(inner)),
        SmtTerm::Cos(inner) => format!("(cos {})", to_smtlib(inner)),
        SmtTerm::Exp(inner) => format!("(exp {})", to_smtlib(inner)),
        SmtTerm::Log(inner) => format!("(log {})", to_smtlib(inner)),
        SmtTerm::Tanh(inner) => {
            let e = format!("(exp (* 2.0 {}))", to_smtlib(inner));
            format!("(/ (- {e} 1.0) (+ {e} 1.0))")
        }
        SmtTerm::Eq(lhs, rhs) => binary("=", lhs, rhs),
        SmtTerm::Lt(lhs, rhs) => binary("<", lhs, rhs),
        SmtTerm::Le(lhs, rhs) => binary("<=", lhs, rhs),
        SmtTerm::Gt(lhs, rhs) => binary(">", lhs, rhs),
        SmtTerm::Ge(lhs, rhs) => binary(">=", lhs, rhs),
        SmtTerm::And(terms) => {
            if terms.is_empty() {
                "true".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                nary("and", &terms.iter().collect::<Vec<_>>())
            }
        }
        SmtTerm::Or(terms) => {
            if terms.is_empty() {
                "false".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                nary("or", &terms.iter().collect::<Vec<_>>())
            }
        }
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
        SmtTerm::Implies(lhs, rhs) => binary("=>", lhs, rhs),
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Real => "Real",
    }
}

/// Parse a real value as printed by solvers: `3`, `-0.25`, `1.5e-3`,
/// `1/3`, `(- 2.0)`, `(/ 1 3)`, `(- (/ 1.0 3.0))` and `(/ (- 1) 3)`.
pub fn parse_real_value(text: &str) -> Option<f64> {
    parse_rational(text.trim()).and_then(|r| r.to_f64())
}

fn parse_rational(text: &str) -> Option<BigRational> {
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let inner = inner.trim();
        if let Some(rest) = inner.strip_prefix('-') {
            if rest.starts_with(char::is_whitespace) {
                return parse_rational(rest.trim()).map(|r| -r);
            }
        }
        if let Some(rest) = inner.strip_prefix('/') {
            let (num, den) = split_operands(rest.trim())?;
            let num = parse_rational(num)?;
            let den = parse_rational(den)?;
            if den.is_zero() {
                return None;
            }
            return Some(num / den);
        }
        return None;
    }
    if let Some((num, den)) = text.split_once('/') {
        let den = parse_decimal(den.trim())?;
        return (!den.is_zero()).then_some(parse_decimal(num.trim())? / den);
    }
    parse_decimal(text)
}

/// Split `a b` where either side may be parenthesised.
fn split_operands(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            c if c.is_whitespace() && depth == 0 => {
                return Some((&text[..i], text[i..].trim()));
            }
            _ => {}
        }
    }
    None
}

fn parse_decimal(text: &str) -> Option<BigRational> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (mantissa, exponent) = match digits.find(['e', 'E']) {
        Some(pos) => (&digits[..pos], digits[pos + 1..].parse::<i32>().ok()?),
        None => (digits, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let all_digits = format!("{int_part}{frac_part}");
    let numer: BigInt = if all_digits.is_empty() {
        BigInt::zero()
    } else {
        all_digits.parse().ok()?
    };
    let scale = exponent - i32::try_from(frac_part.len()).ok()?;
    let ten = BigRational::from_integer(BigInt::from(10));
    let mut value = BigRational::from_integer(numer);
    if scale >= 0 {
        for _ in 0..scale {
            value *= &ten;
        }
    } else {
        for _ in 0..(-scale) {
            value /= &ten;
        }
    }
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_simple_term() {
        let term = SmtTerm::var("x0").add(SmtTerm::int(1)).ge(SmtTerm::int(0));
        assert_eq!(to_smtlib(&term), "(>= (+ x0 1.0) 0.0)");
    }

    #[test]
    fn print_and_term() {
        let term = SmtTerm::and(vec![
            SmtTerm::var("a").gt(SmtTerm::int(0)),
            SmtTerm::var("b").lt(SmtTerm::int(-10)),
        ]);
        assert_eq!(to_smtlib(&term), "(and (> a 0.0) (< b (- 10.0)))");
    }

    #[test]
    fn print_rational_power_and_tanh() {
        let third = SmtTerm::real(BigRational::new(BigInt::from(-1), BigInt::from(3)));
        assert_eq!(to_smtlib(&third), "(- (/ 1.0 3.0))");
        assert_eq!(to_smtlib(&SmtTerm::var("x").pow(3)), "(* x x x)");
        assert_eq!(
            to_smtlib(&SmtTerm::var("x").tanh()),
            "(/ (- (exp (* 2.0 x)) 1.0) (+ (exp (* 2.0 x)) 1.0))"
        );
    }

    #[test]
    fn parse_solver_real_values() {
        assert_eq!(parse_real_value("3"), Some(3.0));
        assert_eq!(parse_real_value("-0.25"), Some(-0.25));
        assert_eq!(parse_real_value("1.5e-3"), Some(0.0015));
        assert_eq!(parse_real_value("(- 2.0)"), Some(-2.0));
        assert_eq!(parse_real_value("(/ 1 4)"), Some(0.25));
        assert_eq!(parse_real_value("(- (/ 1.0 4.0))"), Some(-0.25));
        assert_eq!(parse_real_value("(/ (- 1) 4)"), Some(-0.25));
        assert_eq!(parse_real_value("-1/4"), Some(-0.25));
        assert_eq!(parse_real_value("(/ 1 0)"), None);
        assert_eq!(parse_real_value("root-obj"), None);
    }
}
