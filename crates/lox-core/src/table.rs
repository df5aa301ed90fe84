//! table.rs — Table de hachage à adressage ouvert + interning des chaînes.
//!
//! Sondage linéaire avec pierres tombales :
//! - clé absente + valeur nil   = case libre (termine une recherche ratée)
//! - clé absente + valeur true  = tombale (le sondage continue)
//!
//! `len` compte les entrées vivantes **et** les tombales : une tombale
//! occupe toujours sa séquence de sondage, elle pèse donc dans le facteur
//! de charge. Le redimensionnement (seuil 0.75, capacité doublée, minimum 8)
//! ré-insère les vivantes seules et recompte.
//!
//! Les clés sont des chaînes internées : l'égalité de clé est l'identité
//! (`Rc::ptr_eq`). La seule comparaison profonde du système est
//! `find_string`, le point d'entrée de l'interning.

use std::rc::Rc;

use crate::value::{LoxStr, Value};

const TABLE_MAX_LOAD: f64 = 0.75;

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 { 8 } else { capacity * 2 }
}

#[derive(Debug, Clone)]
struct Entry {
    key: Option<Rc<LoxStr>>,
    value: Value,
}

impl Entry {
    fn vacant() -> Self {
        Self { key: None, value: Value::Nil }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !matches!(self.value, Value::Nil)
    }
}

/// Table à adressage ouvert, clés = chaînes internées.
#[derive(Debug, Clone, Default)]
pub struct Table {
    len: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self { len: 0, entries: Vec::new() }
    }

    /// Entrées vivantes + tombales (charge réelle des séquences de sondage).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Index de l'entrée pour `key` : soit la case vivante correspondante,
    /// soit la case où insérer (première tombale croisée, sinon la case
    /// libre qui termine le sondage).
    fn find_entry(entries: &[Entry], key: &Rc<LoxStr>) -> usize {
        let capacity = entries.len();
        let mut idx = key.hash() as usize % capacity;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[idx];
            match &entry.key {
                None => {
                    if entry.is_tombstone() {
                        tombstone.get_or_insert(idx);
                    } else {
                        return tombstone.unwrap_or(idx);
                    }
                }
                Some(existing) if Rc::ptr_eq(existing, key) => return idx,
                Some(_) => {}
            }
            idx = (idx + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::vacant(); capacity];
        // Seules les vivantes sont ré-insérées : les tombales disparaissent
        // et `len` est recompté.
        self.len = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let dest = Self::find_entry(&entries, &key);
                entries[dest] = Entry { key: Some(key), value: entry.value };
                self.len += 1;
            }
        }
        self.entries = entries;
    }

    /// Insère ou remplace. Retourne vrai si la clé est nouvelle — le
    /// contrat dont `SetGlobal` a besoin pour détecter une globale absente.
    pub fn set(&mut self, key: Rc<LoxStr>, value: Value) -> bool {
        if (self.len + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = grow_capacity(self.entries.len());
            self.adjust_capacity(capacity);
        }

        let idx = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[idx];
        let is_new_key = entry.key.is_none();
        // Une tombale est déjà comptée dans `len` ; seule une case vraiment
        // libre incrémente.
        if is_new_key && matches!(entry.value, Value::Nil) {
            self.len += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: &Rc<LoxStr>) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_entry(&self.entries, key)];
        entry.key.as_ref().map(|_| entry.value.clone())
    }

    /// Supprime en posant une tombale. `len` ne décroît pas : la tombale
    /// reste comptée jusqu'au prochain redimensionnement.
    pub fn delete(&mut self, key: &Rc<LoxStr>) -> bool {
        if self.len == 0 {
            return false;
        }
        let idx = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[idx];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Copie toutes les entrées vivantes de `self` vers `to`.
    pub fn add_all(&self, to: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = &entry.key {
                to.set(key.clone(), entry.value.clone());
            }
        }
    }

    /// Recherche par contenu : (longueur, hash, octets). C'est l'unique
    /// comparaison profonde de chaînes ; tout le reste du système compare
    /// par identité.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<LoxStr>> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut idx = hash as usize % capacity;
        loop {
            let entry = &self.entries[idx];
            match &entry.key {
                None => {
                    // Une case libre (non tombale) clôt la recherche.
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key)
                    if key.len() == chars.len()
                        && key.hash() == hash
                        && key.chars() == chars =>
                {
                    return Some(key.clone());
                }
                Some(_) => {}
            }
            idx = (idx + 1) % capacity;
        }
    }
}

/// FNV-1a 32 bits, le hash de toutes les chaînes internées.
pub fn hash_string(chars: &str) -> u32 {
    let mut hash = 2_166_136_261u32;
    for byte in chars.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// L'interneur : une `Table` dont les clés sont les chaînes canoniques
/// (valeurs nil, inutilisées). Tout chemin de construction de chaîne passe
/// par ici et retourne l'instance canonique.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Table,
}

impl Interner {
    pub fn new() -> Self {
        Self { strings: Table::new() }
    }

    /// Copie `chars` dans le tas, sauf si une chaîne identique est déjà
    /// internée — dans ce cas l'instance existante est réutilisée.
    pub fn intern(&mut self, chars: &str) -> Rc<LoxStr> {
        let hash = hash_string(chars);
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }
        let string = Rc::new(LoxStr::new(chars.into(), hash));
        self.strings.set(string.clone(), Value::Nil);
        string
    }

    /// Concatène deux chaînes internées. Le tampon intermédiaire est libéré
    /// aussitôt si le résultat existait déjà.
    pub fn concat(&mut self, a: &LoxStr, b: &LoxStr) -> Rc<LoxStr> {
        let mut chars = String::with_capacity(a.len() + b.len());
        chars.push_str(a.chars());
        chars.push_str(b.chars());
        self.intern(&chars)
    }
}
