// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::number::Number;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Dimension vector: dimension name to exponent. Zero exponents are
/// never stored.
pub type DimVec = BTreeMap<Rc<str>, i32>;

/// A named unit. `scale`/`offset` convert a magnitude into the base
/// unit of its dimension: `base = x * scale + offset`. Compound units
/// are always linear (offset 0).
#[derive(Debug, Clone)]
pub struct Unit {
    pub name: Rc<str>,
    pub dim: DimVec,
    scale: f64,
    offset: f64,
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.dim == other.dim
    }
}

impl Eq for Unit {}

impl Unit {
    pub fn base() -> Unit {
        Unit {
            name: "1".into(),
            dim: DimVec::new(),
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dim.is_empty()
    }

    /// Currency units live in their own `currency…` dimensions and get
    /// the five-decimal truncated rendering.
    pub fn is_currency(&self) -> bool {
        self.dim.keys().any(|k| k.starts_with("currency"))
    }

    pub fn to_base(&self, x: &Number) -> Number {
        if self.scale == 1.0 && self.offset == 0.0 {
            return x.clone();
        }
        let v = x.as_f64().unwrap_or(0.0);
        Number::from(v * self.scale + self.offset)
    }

    pub fn from_base(&self, x: &Number) -> Number {
        if self.scale == 1.0 && self.offset == 0.0 {
            return x.clone();
        }
        let v = x.as_f64().unwrap_or(0.0);
        Number::from((v - self.offset) / self.scale)
    }
}

/// A magnitude paired with a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    pub magnitude: Number,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: Number, unit: Unit) -> Quantity {
        Quantity { magnitude, unit }
    }

    pub fn add(&self, rhs: &Quantity) -> Result<Quantity> {
        self.combine(rhs, false)
    }

    pub fn sub(&self, rhs: &Quantity) -> Result<Quantity> {
        self.combine(rhs, true)
    }

    fn combine(&self, rhs: &Quantity, negate: bool) -> Result<Quantity> {
        if self.unit.dim != rhs.unit.dim {
            bail!(
                "unit mismatch: cannot combine `{}` with `{}`",
                self.unit.name,
                rhs.unit.name
            );
        }
        let a = self.unit.to_base(&self.magnitude);
        let b = rhs.unit.to_base(&rhs.magnitude);
        let base = if negate { a.sub(&b)? } else { a.add(&b)? };
        Ok(Quantity {
            magnitude: self.unit.from_base(&base),
            unit: self.unit.clone(),
        })
    }

    pub fn mul(&self, rhs: &Quantity) -> Result<Quantity> {
        let dim = merge_dims(&self.unit.dim, &rhs.unit.dim, 1);
        let a = self.unit.to_base(&self.magnitude);
        let b = rhs.unit.to_base(&rhs.magnitude);
        Ok(Quantity {
            magnitude: a.mul(&b)?,
            unit: compound_result(&self.unit, &rhs.unit, '*', dim),
        })
    }

    pub fn div(&self, rhs: &Quantity) -> Result<Quantity> {
        let dim = merge_dims(&self.unit.dim, &rhs.unit.dim, -1);
        let a = self.unit.to_base(&self.magnitude);
        let b = rhs.unit.to_base(&rhs.magnitude);
        Ok(Quantity {
            magnitude: a.divide(&b)?,
            unit: compound_result(&self.unit, &rhs.unit, '/', dim),
        })
    }

    pub fn scale(&self, k: &Number) -> Result<Quantity> {
        Ok(Quantity {
            magnitude: self.magnitude.mul(k)?,
            unit: self.unit.clone(),
        })
    }

    pub fn scale_div(&self, k: &Number) -> Result<Quantity> {
        Ok(Quantity {
            magnitude: self.magnitude.divide(k)?,
            unit: self.unit.clone(),
        })
    }

    /// Triple-object text. Currency quantities render with a truncated
    /// five-decimal magnitude, everything else with the canonical one.
    pub fn to_triple_text(&self) -> String {
        if self.unit.is_currency() {
            format!(
                "{} {}",
                self.magnitude.to_truncated_5dp_string(),
                self.unit.name
            )
        } else {
            format!("{} {}", self.magnitude.to_canonical_string(), self.unit.name)
        }
    }
}

fn merge_dims(a: &DimVec, b: &DimVec, sign: i32) -> DimVec {
    let mut dim = a.clone();
    for (k, e) in b {
        let entry = dim.entry(k.clone()).or_insert(0);
        *entry += e * sign;
    }
    dim.retain(|_, e| *e != 0);
    dim
}

fn compound_result(a: &Unit, b: &Unit, op: char, dim: DimVec) -> Unit {
    if dim.is_empty() {
        return Unit::base();
    }
    Unit {
        name: format!("{}{}{}", a.name, op, b.name).into(),
        dim,
        scale: 1.0,
        offset: 0.0,
    }
}

#[derive(Debug, Clone)]
struct AtomicUnit {
    kind: Rc<str>,
    scale: f64,
    offset: f64,
}

/// Registry of atomic units. Compound names (`kg*m/s^2`) are resolved
/// on lookup by summing component dimension vectors.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    atoms: BTreeMap<Rc<str>, AtomicUnit>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        let mut r = UnitRegistry {
            atoms: BTreeMap::new(),
        };

        // Lengths, base meter.
        r.add("m", "length", 1.0);
        r.add("km", "length", 1000.0);
        r.add("cm", "length", 0.01);
        r.add("mm", "length", 0.001);
        r.add("in", "length", 0.0254);
        r.add("ft", "length", 0.3048);
        r.add("mi", "length", 1609.344);

        // Masses, base kilogram.
        r.add("kg", "mass", 1.0);
        r.add("g", "mass", 0.001);
        r.add("mg", "mass", 1e-6);
        r.add("lb", "mass", 0.453_592_37);
        r.add("oz", "mass", 0.028_349_523_125);

        // Times, base second.
        r.add("s", "time", 1.0);
        r.add("ms", "time", 0.001);
        r.add("min", "time", 60.0);
        r.add("h", "time", 3600.0);
        r.add("d", "time", 86400.0);

        // Volumes, base liter.
        r.add("L", "volume", 1.0);
        r.add("mL", "volume", 0.001);
        r.add("gal", "volume", 3.785_411_784);
        r.add("qt", "volume", 0.946_352_946);
        r.add("pt", "volume", 0.473_176_473);
        r.add("cup", "volume", 0.236_588_236_5);
        r.add("floz", "volume", 0.029_573_529_562_5);

        // Temperatures, base kelvin. Affine units never compound.
        r.add_affine("K", "temperature", 1.0, 0.0);
        r.add_affine("C", "temperature", 1.0, 273.15);
        r.add_affine("F", "temperature", 5.0 / 9.0, 459.67 * 5.0 / 9.0);

        // Currencies are deliberately pairwise incompatible: each code
        // is its own dimension. Hosts that want converted sums register
        // codes under a shared dimension with conversion factors.
        for code in ["USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD"] {
            r.add(code, &format!("currency/{code}"), 1.0);
        }

        r
    }
}

impl UnitRegistry {
    pub fn empty() -> UnitRegistry {
        UnitRegistry {
            atoms: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, name: &str, kind: &str, scale: f64) {
        self.add_affine(name, kind, scale, 0.0);
    }

    pub fn add_affine(&mut self, name: &str, kind: &str, scale: f64, offset: f64) {
        self.atoms.insert(
            name.into(),
            AtomicUnit {
                kind: kind.into(),
                scale,
                offset,
            },
        );
    }

    pub fn list(&self) -> Vec<Rc<str>> {
        self.atoms.keys().cloned().collect()
    }

    /// Resolve a unit name. Compound names follow the grammar
    /// `term (('*'|'/') term)*`, `term := name('^' int)?`. A name that
    /// does not resolve is treated as opaque by callers, so failure is
    /// `None` rather than an error.
    pub fn get(&self, name: &str) -> Option<Unit> {
        if name == "1" {
            return Some(Unit::base());
        }
        if let Some(atom) = self.atoms.get(name) {
            let mut dim = DimVec::new();
            dim.insert(atom.kind.clone(), 1);
            return Some(Unit {
                name: name.into(),
                dim,
                scale: atom.scale,
                offset: atom.offset,
            });
        }
        self.parse_compound(name)
    }

    fn parse_compound(&self, name: &str) -> Option<Unit> {
        let mut dim = DimVec::new();
        let mut scale = 1.0f64;
        let mut rest = name;
        let mut sign = 1i32;

        loop {
            let term_end = rest.find(['*', '/']).unwrap_or(rest.len());
            let term = &rest[..term_end];

            let (atom_name, exp) = match term.split_once('^') {
                Some((n, e)) => (n, i32::from_str(e).ok()?),
                _ => (term, 1),
            };
            if atom_name.is_empty() {
                return None;
            }
            let atom = self.atoms.get(atom_name)?;
            if atom.offset != 0.0 {
                // Affine units (temperatures) cannot appear in compounds.
                return None;
            }

            let signed_exp = exp * sign;
            let entry = dim.entry(atom.kind.clone()).or_insert(0);
            *entry += signed_exp;
            scale *= atom.scale.powi(signed_exp);

            if term_end == rest.len() {
                break;
            }
            sign = if &rest[term_end..=term_end] == "*" { 1 } else { -1 };
            rest = &rest[term_end + 1..];
        }

        dim.retain(|_, e| *e != 0);
        Some(Unit {
            name: name.into(),
            dim,
            scale,
            offset: 0.0,
        })
    }

    /// Materialize `"<number> <unit>"` strings as quantities. Anything
    /// else, including unknown unit names, is left to the caller.
    pub fn parse_quantity(&self, text: &str) -> Option<Quantity> {
        let (num_part, unit_part) = text.trim().split_once(' ')?;
        let unit_part = unit_part.trim();
        if unit_part.is_empty() || unit_part.contains(' ') {
            return None;
        }
        let magnitude = Number::from_str(num_part).ok()?;
        let unit = self.get(unit_part)?;
        Some(Quantity { magnitude, unit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(reg: &UnitRegistry, text: &str) -> Quantity {
        match reg.parse_quantity(text) {
            Some(q) => q,
            _ => Quantity::new(Number::zero(), Unit::base()),
        }
    }

    #[test]
    fn same_unit_addition() -> Result<()> {
        let reg = UnitRegistry::default();
        let sum = q(&reg, "100 USD").add(&q(&reg, "50 USD"))?;
        assert_eq!(sum.to_triple_text(), "150.00000 USD");
        Ok(())
    }

    #[test]
    fn cross_currency_is_a_mismatch() {
        let reg = UnitRegistry::default();
        assert!(q(&reg, "100 USD").add(&q(&reg, "50 EUR")).is_err());
    }

    #[test]
    fn shared_dimension_currencies_convert() -> Result<()> {
        let mut reg = UnitRegistry::default();
        reg.add("USDx", "currency", 1.0);
        reg.add("EURx", "currency", 1.1);
        let sum = q(&reg, "100 USDx").add(&q(&reg, "50 EURx"))?;
        assert_eq!(sum.to_triple_text(), "155.00000 USDx");
        Ok(())
    }

    #[test]
    fn length_addition_converts_through_base() -> Result<()> {
        let reg = UnitRegistry::default();
        let sum = q(&reg, "1 km").add(&q(&reg, "500 m"))?;
        assert_eq!(sum.magnitude.to_canonical_string(), "1.5");
        assert_eq!(sum.unit.name.as_ref(), "km");
        Ok(())
    }

    #[test]
    fn dim_algebra() -> Result<()> {
        let reg = UnitRegistry::default();
        let v = q(&reg, "10 m").div(&q(&reg, "2 s"))?;
        assert_eq!(v.magnitude.to_canonical_string(), "5");
        assert_eq!(v.unit.dim.get("length"), Some(&1));
        assert_eq!(v.unit.dim.get("time"), Some(&-1));

        // Multiplying back by time cancels the exponent entirely.
        let d = v.mul(&q(&reg, "4 s"))?;
        assert_eq!(d.magnitude.to_canonical_string(), "20");
        assert!(d.unit.dim.get("time").is_none());
        Ok(())
    }

    #[test]
    fn compound_unit_parsing() {
        let reg = UnitRegistry::default();
        let u = reg.get("kg*m/s^2");
        assert!(u.is_some());
        if let Some(u) = u {
            assert_eq!(u.dim.get("mass"), Some(&1));
            assert_eq!(u.dim.get("length"), Some(&1));
            assert_eq!(u.dim.get("time"), Some(&-2));
        }
        assert!(reg.get("bogus").is_none());
        assert!(reg.get("C*m").is_none());
    }

    #[test]
    fn quantity_strings() {
        let reg = UnitRegistry::default();
        assert!(reg.parse_quantity("100 USD").is_some());
        assert!(reg.parse_quantity("hello world").is_none());
        assert!(reg.parse_quantity("100").is_none());
    }
}
