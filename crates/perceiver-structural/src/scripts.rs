//! The in-page helper blob.
//!
//! A single script injected into every frame on navigation, guarded by
//! `window.__aiBrowserAutomationInjected` so re-injection is a no-op. It is
//! the one bridge from CDP backend ids back to live DOM operations: XPath
//! synthesis, scrollable detection, scroll-end waits, and the observe
//! overlay all live here.

/// Global flag that marks a document as already carrying the helpers.
pub const INJECTED_FLAG: &str = "__aiBrowserAutomationInjected";

/// The raw helper functions, attached to `window`.
pub const HELPER_SCRIPT: &str = r#"
(() => {
  // Positional absolute XPath: /html[1]/.../tag[n], where n counts siblings
  // of the same nodeName. Text and comment nodes use text()[n] / comment()[n].
  function generateXPath(node) {
    const parts = [];
    let current = node;
    while (current && (current.nodeType === Node.ELEMENT_NODE ||
                       current.nodeType === Node.TEXT_NODE ||
                       current.nodeType === Node.COMMENT_NODE)) {
      let index = 1;
      for (let sib = current.previousSibling; sib; sib = sib.previousSibling) {
        if (sib.nodeType === current.nodeType && sib.nodeName === current.nodeName) {
          index += 1;
        }
      }
      if (current.nodeType === Node.TEXT_NODE) {
        parts.unshift(`text()[${index}]`);
      } else if (current.nodeType === Node.COMMENT_NODE) {
        parts.unshift(`comment()[${index}]`);
      } else {
        parts.unshift(`${current.nodeName.toLowerCase()}[${index}]`);
      }
      current = current.parentNode;
      if (current && current.nodeType === Node.DOCUMENT_NODE) {
        break;
      }
    }
    return parts.length ? `/${parts.join('/')}` : '';
  }

  // Attributes worth combining into a unique selector, most telling first.
  const ATTRIBUTE_PRIORITY = [
    'data-qa', 'data-component', 'data-role', 'role', 'aria-role',
    'type', 'name', 'aria-label', 'placeholder', 'title', 'alt',
  ];

  function escapeXPathValue(value) {
    if (!value.includes('"')) return `"${value}"`;
    if (!value.includes("'")) return `'${value}'`;
    const parts = value.split('"').map((part) => `"${part}"`);
    return `concat(${parts.join(`, '"', `)})`;
  }

  function matchCount(xpath) {
    try {
      const result = document.evaluate(
        xpath, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      return result.snapshotLength;
    } catch (err) {
      return -1;
    }
  }

  function combinations(items, size) {
    const out = [];
    const walk = (start, acc) => {
      if (acc.length === size) { out.push(acc.slice()); return; }
      for (let i = start; i < items.length; i += 1) {
        acc.push(items[i]);
        walk(i + 1, acc);
        acc.pop();
      }
    };
    walk(0, []);
    return out;
  }

  // Attribute-combination selector verified to match exactly one node.
  function generateUniqueXPath(el) {
    const tag = el.nodeName.toLowerCase();
    const present = [];
    for (const attr of ATTRIBUTE_PRIORITY) {
      const value = el.getAttribute(attr);
      if (value) present.push({ attr, value });
    }
    for (let size = 1; size <= present.length; size += 1) {
      for (const combo of combinations(present, size)) {
        const conditions = combo
          .map(({ attr, value }) => `@${attr}=${escapeXPathValue(value)}`)
          .join(' and ');
        const xpath = `//${tag}[${conditions}]`;
        if (matchCount(xpath) === 1) return xpath;
      }
    }
    return null;
  }

  // Ordered most-specific-first: unique attribute combo, id-based, positional.
  function generateXPathsForElement(el) {
    if (!el) return [];
    const xpaths = [];
    const unique = generateUniqueXPath(el);
    if (unique) xpaths.push(unique);
    if (el.id) xpaths.push(`//*[@id=${escapeXPathValue(el.id)}]`);
    xpaths.push(generateXPath(el));
    return xpaths;
  }

  function canElementScroll(el) {
    if (typeof el.scrollTo !== 'function') return false;
    const original = el.scrollTop;
    try {
      el.scrollTo({ top: original + 1, left: 0, behavior: 'instant' });
      const moved = el.scrollTop !== original;
      el.scrollTo({ top: original, left: 0, behavior: 'instant' });
      return moved;
    } catch (err) {
      return false;
    }
  }

  // Every element that both declares scrollable overflow and actually moves,
  // largest first. The root <html> is always a candidate.
  function getScrollableElements(topN) {
    const docEl = document.documentElement;
    const scrollables = [docEl];
    const all = document.querySelectorAll('*');
    for (const el of all) {
      if (el === docEl) continue;
      const style = window.getComputedStyle(el);
      const overflowY = style.overflowY;
      const scrollable = (overflowY === 'auto' || overflowY === 'scroll' || overflowY === 'overlay')
        && el.scrollHeight > el.clientHeight
        && canElementScroll(el);
      if (scrollable) scrollables.push(el);
    }
    scrollables.sort((a, b) => b.scrollHeight - a.scrollHeight);
    return topN ? scrollables.slice(0, topN) : scrollables;
  }

  function getScrollableElementXpaths(topN) {
    return getScrollableElements(topN).map((el) => {
      const xpaths = generateXPathsForElement(el);
      return xpaths.length ? xpaths[0] : '';
    });
  }

  function getNodeFromXpath(xpath) {
    return document.evaluate(
      xpath, document.documentElement, null,
      XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  }

  // Resolves once no scroll event has fired on el for idleMs.
  function waitForElementScrollEnd(el, idleMs) {
    const quiet = idleMs || 100;
    return new Promise((resolve) => {
      let timer;
      const done = () => {
        el.removeEventListener('scroll', onScroll);
        resolve();
      };
      const onScroll = () => {
        clearTimeout(timer);
        timer = setTimeout(done, quiet);
      };
      el.addEventListener('scroll', onScroll, { passive: true });
      timer = setTimeout(done, quiet);
    });
  }

  const OVERLAY_CLASS = '__webpilotOverlay';

  function clearObserveOverlays() {
    document.querySelectorAll(`.${OVERLAY_CLASS}`).forEach((el) => el.remove());
  }

  function drawObserveOverlay(xpaths) {
    clearObserveOverlays();
    let drawn = 0;
    for (const xpath of xpaths) {
      const node = xpath ? getNodeFromXpath(xpath) : null;
      if (!node || node.nodeType !== Node.ELEMENT_NODE) continue;
      const rect = node.getBoundingClientRect();
      const overlay = document.createElement('div');
      overlay.className = OVERLAY_CLASS;
      overlay.style.cssText = [
        'position: fixed',
        `top: ${rect.top}px`,
        `left: ${rect.left}px`,
        `width: ${rect.width}px`,
        `height: ${rect.height}px`,
        'outline: 2px solid rgba(46, 134, 222, 0.9)',
        'background: rgba(46, 134, 222, 0.12)',
        'pointer-events: none',
        'z-index: 2147483646',
      ].join('; ');
      document.body.appendChild(overlay);
      drawn += 1;
    }
    return drawn;
  }

  window.generateXPath = generateXPath;
  window.generateXPathsForElement = generateXPathsForElement;
  window.getScrollableElements = getScrollableElements;
  window.getScrollableElementXpaths = getScrollableElementXpaths;
  window.getNodeFromXpath = getNodeFromXpath;
  window.waitForElementScrollEnd = waitForElementScrollEnd;
  window.drawObserveOverlay = drawObserveOverlay;
  window.clearObserveOverlays = clearObserveOverlays;
})();
"#;

/// The helper blob wrapped in its injection guard. Safe to run any number of
/// times in the same document.
pub fn guarded_helper_script() -> String {
    format!(
        "if (!window.{flag}) {{\n{script}\nwindow.{flag} = true;\n}}",
        flag = INJECTED_FLAG,
        script = HELPER_SCRIPT,
    )
}

/// Expression that reports whether the helpers are present in a document.
pub fn injection_probe() -> String {
    format!("!!window.{INJECTED_FLAG}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_wraps_script_once() {
        let guarded = guarded_helper_script();
        assert!(guarded.starts_with(&format!("if (!window.{INJECTED_FLAG})")));
        assert!(guarded.contains("window.generateXPath"));
        assert!(guarded.trim_end().ends_with('}'));
        assert_eq!(guarded.matches(INJECTED_FLAG).count(), 2);
    }

    #[test]
    fn probe_checks_guard_flag() {
        assert_eq!(
            injection_probe(),
            "!!window.__aiBrowserAutomationInjected"
        );
    }
}
